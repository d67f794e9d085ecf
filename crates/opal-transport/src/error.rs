use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connect url invalid: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("pub/sub error: {0}")]
    PubSub(#[from] opal_pubsub::PubSubError),
}

pub type Result<T> = std::result::Result<T, TransportError>;
