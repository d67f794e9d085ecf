use thiserror::Error;

/// Errors produced while building or validating the shared OPAL data model.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("bundle invariant violated: {0}")]
    InvalidBundle(String),

    #[error("path escapes working directory: {0}")]
    PathEscape(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
