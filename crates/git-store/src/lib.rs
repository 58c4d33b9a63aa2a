//! Embedded Git repository engine: object database (loose + packs), tree and
//! commit codecs, reference store with locked compare-and-swap updates, and
//! pack stream I/O for the Smart HTTP transport.

pub mod errors;
pub mod hash;
pub mod objects;
pub mod odb;
pub mod pack;
pub mod refs;
pub mod repo;
pub mod testing;
pub mod zlib;

pub use errors::{GitError, Result};
pub use hash::{HashKind, Hasher, ObjectId};
pub use objects::{ObjectData, ObjectType};
pub use repo::{CommitMetadata, Operation, Repository, Signature};
