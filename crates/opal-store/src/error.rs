use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid json patch: {0}")]
    Patch(#[from] json_patch::PatchError),

    #[error("policy engine rejected source for {id}: {message}")]
    InvalidPolicySource { id: String, message: String },

    #[error("upstream returned status {status} for {path}")]
    UpstreamStatus { status: u16, path: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
