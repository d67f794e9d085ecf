use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] opal_store::StoreError),

    #[error("requested base_hash not found upstream")]
    BaseNotFound,

    #[error("bundle application failed after exhausting retries: {0:?}")]
    WritesExhausted(Vec<String>),
}

pub type Result<T> = std::result::Result<T, ClientError>;
