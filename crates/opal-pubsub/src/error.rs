use thiserror::Error;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("subscribe rejected, topics not permitted: {0:?}")]
    Unauthorized(Vec<String>),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis pool creation error: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PubSubError>;
