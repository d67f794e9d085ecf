//! Server-side bookkeeping of connected pub/sub clients.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A websocket connection's identity as seen by the Server. A reconnect
/// reusing the same `client_id` bumps `refcount` on the existing record
/// instead of creating a new one; the record is evicted once `refcount`
/// reaches zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    pub source_host: String,
    pub source_port: u16,
    #[serde(with = "time::serde::rfc3339")]
    pub connect_time: OffsetDateTime,
    pub subscribed_topics: HashSet<String>,
    pub refcount: u32,
}

impl ClientInfo {
    pub fn new(client_id: impl Into<String>, source_host: impl Into<String>, source_port: u16) -> Self {
        Self {
            client_id: client_id.into(),
            source_host: source_host.into(),
            source_port,
            connect_time: OffsetDateTime::now_utc(),
            subscribed_topics: HashSet::new(),
            refcount: 1,
        }
    }
}

/// Payload published on `__opal_stats_add` / `__opal_stats_rm` when the
/// statistics feature is enabled, so operators can track fleet size without
/// reading the Server's in-memory `ClientRegistry` directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStat {
    pub client_id: String,
    pub topics: Vec<String>,
    pub rpc_id: String,
}
