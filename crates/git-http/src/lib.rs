//! Git Smart HTTP (protocol v0) service over the `git-store` engine:
//! `info/refs` advertisement, `git-upload-pack`, and `git-receive-pack`
//! with authorization hooks, per-reference locking, and side-band framed
//! responses.

pub mod advertise;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod pkt;
pub mod receive;
pub mod repo_path;
pub mod state;
pub mod upload;

pub use config::{AccessMode, AllowAll, Authorizer, GitHttpOptions, ReceivePackHook, RefUpdate};
pub use handlers::router;
pub use state::GitHttp;
