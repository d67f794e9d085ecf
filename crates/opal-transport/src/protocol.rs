//! Wire messages for the `/ws` RPC loop (spec §4.3/§4.4). Tagged JSON so a
//! single websocket frame unambiguously decodes to one variant.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    Publish { topics: Vec<String>, data: serde_json::Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Notify {
        subscription: String,
        data: serde_json::Value,
    },
    Ack,
    Error {
        message: String,
    },
}
