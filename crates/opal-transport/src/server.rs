//! Server-side half of the `/ws` endpoint (spec §4.3): upgrade, authenticate,
//! track the client, then run the subscribe/unsubscribe/publish/notify RPC
//! loop until disconnect.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRef, Query, State};
use axum::response::Response;
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use opal_auth::{AuthState, BearerAuth, Claims};
use opal_core::{ClientInfo, ClientStat, Topic};
use opal_pubsub::Broadcaster;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, ServerMessage};

/// Topics the statistics feature publishes client connect/disconnect events
/// on, mirroring the original's `__opal_stats_add` / `__opal_stats_rm`
/// (spec §6).
pub const STATS_ADD_TOPIC: &str = "__opal_stats_add";
pub const STATS_REMOVE_TOPIC: &str = "__opal_stats_rm";

/// Server-side bookkeeping of connected clients, keyed by `client_id`. A
/// reconnect reusing the same id bumps `refcount` instead of creating a
/// second record.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, ClientInfo>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, client_id: &str, host: &str, port: u16) {
        self.clients
            .entry(client_id.to_string())
            .and_modify(|c| c.refcount += 1)
            .or_insert_with(|| ClientInfo::new(client_id, host, port));
    }

    /// Decrements refcount, evicting the record once it reaches zero.
    pub fn disconnect(&self, client_id: &str) {
        let evict = self
            .clients
            .get_mut(client_id)
            .map(|mut entry| {
                entry.refcount = entry.refcount.saturating_sub(1);
                entry.refcount == 0
            })
            .unwrap_or(false);
        if evict {
            self.clients.remove(client_id);
        }
    }

    pub fn record_subscription(&self, client_id: &str, topics: &[String]) {
        if let Some(mut entry) = self.clients.get_mut(client_id) {
            entry.subscribed_topics.extend(topics.iter().cloned());
        }
    }

    pub fn get(&self, client_id: &str) -> Option<ClientInfo> {
        self.clients.get(client_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "__opal_client_id")]
    pub client_id: Option<String>,
}

/// What the `/ws` handler needs out of the application state. Implement
/// `FromRef<S>` for `AuthState` as well to satisfy `BearerAuth`.
pub trait PubSubAppState {
    fn broadcaster(&self) -> &Broadcaster;
    fn registry(&self) -> &Arc<ClientRegistry>;

    /// Whether connect/disconnect events should be published on
    /// `__opal_stats_add` / `__opal_stats_rm`. Off by default.
    fn statistics_enabled(&self) -> bool {
        false
    }
}

pub async fn ws_handler<S>(
    ws: WebSocketUpgrade,
    State(state): State<S>,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    BearerAuth(claims): BearerAuth,
) -> Response
where
    S: PubSubAppState + Send + Sync + 'static,
    AuthState: FromRef<S>,
{
    let client_id = query
        .client_id
        .unwrap_or_else(|| format!("{}:{}", addr.ip(), addr.port()));
    let broadcaster = state.broadcaster().clone();
    let registry = state.registry().clone();
    let statistics_enabled = state.statistics_enabled();
    let host = addr.ip().to_string();
    let port = addr.port();

    ws.on_upgrade(move |socket| async move {
        handle_socket(
            socket,
            client_id,
            host,
            port,
            claims,
            broadcaster,
            registry,
            statistics_enabled,
        )
        .await;
    })
}

#[allow(clippy::too_many_arguments)]
async fn handle_socket(
    socket: WebSocket,
    client_id: String,
    host: String,
    port: u16,
    claims: Claims,
    broadcaster: Broadcaster,
    registry: Arc<ClientRegistry>,
    statistics_enabled: bool,
) {
    registry.connect(&client_id, &host, port);
    if statistics_enabled {
        publish_stat(&broadcaster, STATS_ADD_TOPIC, &client_id, &[]).await;
    }
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel(256);

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(
                            &text,
                            &client_id,
                            &claims,
                            &broadcaster,
                            &registry,
                            &tx,
                            &mut sink,
                        ).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::debug!(%error, client_id, "websocket read error");
                        break;
                    }
                }
            }
            notification = rx.recv() => {
                let Some(notification) = notification else { break };
                let message = ServerMessage::Notify {
                    subscription: notification.topic,
                    data: notification.data,
                };
                if send(&mut sink, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    let topics: Vec<String> = registry
        .get(&client_id)
        .map(|info| info.subscribed_topics.into_iter().collect())
        .unwrap_or_default();
    broadcaster.notifier().unsubscribe_all(&client_id);
    registry.disconnect(&client_id);
    if statistics_enabled {
        publish_stat(&broadcaster, STATS_REMOVE_TOPIC, &client_id, &topics).await;
    }
}

async fn publish_stat(broadcaster: &Broadcaster, topic: &str, client_id: &str, topics: &[String]) {
    let stat = ClientStat {
        client_id: client_id.to_string(),
        topics: topics.to_vec(),
        rpc_id: uuid::Uuid::new_v4().to_string(),
    };
    let Ok(data) = serde_json::to_value(&stat) else {
        return;
    };
    broadcaster.publish(&[topic.to_string()], data).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_client_message(
    text: &str,
    client_id: &str,
    claims: &Claims,
    broadcaster: &Broadcaster,
    registry: &ClientRegistry,
    tx: &mpsc::Sender<opal_pubsub::Notification>,
    sink: &mut SplitSink<WebSocket, Message>,
) {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { topics }) => {
            match broadcaster.notifier().subscribe(
                client_id,
                claims.permitted_topics.as_deref(),
                &topics,
                tx.clone(),
            ) {
                Ok(()) => {
                    registry.record_subscription(client_id, &topics);
                    ServerMessage::Ack
                }
                Err(error) => ServerMessage::Error {
                    message: error.to_string(),
                },
            }
        }
        Ok(ClientMessage::Unsubscribe { topics }) => {
            broadcaster.notifier().unsubscribe(client_id, &topics);
            ServerMessage::Ack
        }
        Ok(ClientMessage::Publish { topics, data }) => {
            let expanded = expand_all(&topics);
            broadcaster.publish(&expanded, data).await;
            ServerMessage::Ack
        }
        Err(error) => ServerMessage::Error {
            message: error.to_string(),
        },
    };
    let _ = send(sink, &reply).await;
}

fn expand_all(topics: &[String]) -> Vec<String> {
    let mut expanded: Vec<String> = topics
        .iter()
        .flat_map(|t| Topic::new(t).expand())
        .map(|t| t.as_str().to_string())
        .collect();
    expanded.sort();
    expanded.dedup();
    expanded
}

async fn send(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    sink.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_connect_bumps_refcount_on_reuse() {
        let registry = ClientRegistry::new();
        registry.connect("client-1", "127.0.0.1", 1234);
        registry.connect("client-1", "127.0.0.1", 1234);
        assert_eq!(registry.get("client-1").unwrap().refcount, 2);
    }

    #[test]
    fn registry_disconnect_evicts_at_zero() {
        let registry = ClientRegistry::new();
        registry.connect("client-1", "127.0.0.1", 1234);
        registry.disconnect("client-1");
        assert!(registry.get("client-1").is_none());
    }

    #[test]
    fn expand_all_dedupes_shared_ancestors() {
        let expanded = expand_all(&["a/b".to_string(), "a/c".to_string()]);
        assert_eq!(expanded, vec!["a", "a/b", "a/c"]);
    }

    #[tokio::test]
    async fn publish_stat_delivers_client_stat_on_stats_topic() {
        let notifier = opal_pubsub::Notifier::new();
        let broadcaster = Broadcaster::local(notifier);
        let (tx, mut rx) = mpsc::channel(8);
        broadcaster
            .notifier()
            .subscribe("observer", None, &[STATS_ADD_TOPIC.to_string()], tx)
            .unwrap();

        publish_stat(&broadcaster, STATS_ADD_TOPIC, "client-1", &[]).await;

        let notification = rx.recv().await.unwrap();
        let stat: ClientStat = serde_json::from_value(notification.data).unwrap();
        assert_eq!(stat.client_id, "client-1");
    }
}
