use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use git_store::GitError;

pub enum GitHttpError {
    NotFound,
    Forbidden(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for GitHttpError {
    fn into_response(self) -> Response {
        match self {
            GitHttpError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
            GitHttpError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            GitHttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            GitHttpError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            GitHttpError::Internal(msg) => {
                tracing::warn!("internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

impl From<GitError> for GitHttpError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::NotFound(_) => GitHttpError::NotFound,
            GitError::InvalidArgument(msg) => GitHttpError::BadRequest(msg),
            GitError::Conflict(msg) => GitHttpError::Conflict(msg),
            GitError::Unauthorized => GitHttpError::Forbidden("unauthorized".into()),
            GitError::InvalidData(msg) => GitHttpError::Internal(msg),
            GitError::Unsupported(msg) => GitHttpError::Internal(msg),
            GitError::Io(err) => GitHttpError::Internal(err.to_string()),
        }
    }
}
