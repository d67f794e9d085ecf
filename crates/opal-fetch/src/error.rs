use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum FetchError {
    #[error("no provider registered for name: {0}")]
    UnknownProvider(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("fetch queue is shutting down")]
    ShuttingDown,
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        FetchError::Http(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
