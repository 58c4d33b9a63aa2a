//! Service configuration: repository root, service toggles, authorization
//! predicate, repository-name hooks, and the post-receive callback.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use git_store::ObjectId;

/// Which side of the protocol a request exercises; `Read` is upload-pack,
/// `Write` is receive-pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Consulted before any repository I/O. Returning `false` produces a 403.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, headers: &HeaderMap, repository: &str, mode: AccessMode) -> bool;
}

/// Default policy for deployments that gate access in front of the service.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _headers: &HeaderMap, _repository: &str, _mode: AccessMode) -> bool {
        true
    }
}

/// One applied ref change, as reported to the post-receive callback.
#[derive(Debug, Clone)]
pub struct RefUpdate {
    pub name: String,
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
}

/// Fired after a receive-pack response is under way. Runs detached; errors
/// are logged and never reach the client.
#[async_trait]
pub trait ReceivePackHook: Send + Sync {
    async fn on_receive_pack_completed(
        &self,
        repository: String,
        updated: Vec<RefUpdate>,
    ) -> anyhow::Result<()>;
}

pub type NameValidator = dyn Fn(&str) -> bool + Send + Sync;
pub type NameNormalizer = dyn Fn(&str) -> String + Send + Sync;
pub type RepositoryResolver = dyn Fn(&HeaderMap, &str) -> Option<String> + Send + Sync;

pub struct GitHttpOptions {
    /// Base directory under which repositories live, as `<name>` or
    /// `<name>.git`.
    pub repository_root: PathBuf,
    pub enable_upload_pack: bool,
    pub enable_receive_pack: bool,
    /// Advertised in the `agent=` capability.
    pub agent: String,
    /// Optional prefix the routes are nested under, e.g. `/git`.
    pub route_prefix: String,
    /// Upper bound on buffered request bodies (push packs included).
    pub max_request_bytes: usize,
    pub authorizer: Arc<dyn Authorizer>,
    /// Overrides the repository name derived from the route.
    pub repository_resolver: Option<Arc<RepositoryResolver>>,
    /// Extra validation applied to the raw incoming name, after the
    /// built-in character checks and before normalization.
    pub repository_name_validator: Option<Arc<NameValidator>>,
    /// Maps a validated name onto the on-disk name.
    pub repository_name_normalizer: Option<Arc<NameNormalizer>>,
    pub on_receive_pack_completed: Option<Arc<dyn ReceivePackHook>>,
}

impl GitHttpOptions {
    pub fn new(repository_root: impl Into<PathBuf>) -> Self {
        GitHttpOptions {
            repository_root: repository_root.into(),
            enable_upload_pack: true,
            enable_receive_pack: true,
            agent: format!("git-store/{}", env!("CARGO_PKG_VERSION")),
            route_prefix: String::new(),
            max_request_bytes: 256 * 1024 * 1024,
            authorizer: Arc::new(AllowAll),
            repository_resolver: None,
            repository_name_validator: None,
            repository_name_normalizer: None,
            on_receive_pack_completed: None,
        }
    }

    /// The capability list advertised on the first ref line.
    pub(crate) fn capabilities(&self) -> String {
        format!(
            "report-status delete-refs side-band-64k ofs-delta agent={}",
            self.agent
        )
    }
}
