use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis pool creation error: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("requested base commit not found: {0}")]
    BaseNotFound(String),

    #[error("unreadable blob at {0}")]
    UnreadableBlob(String),

    #[error("tar entry escapes target directory: {0}")]
    PathEscape(String),

    #[error("webhook signature invalid")]
    WebhookUnauthorized,

    #[error("core error: {0}")]
    Core(#[from] opal_core::CoreError),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
