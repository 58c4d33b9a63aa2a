use std::io;

use thiserror::Error;

/// Error kinds surfaced by the engine. The HTTP layer maps these onto status
/// codes; the wire protocol maps `InvalidData` onto `unpack <err>` and
/// `Conflict` onto `ng <ref> <reason>` lines.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;
