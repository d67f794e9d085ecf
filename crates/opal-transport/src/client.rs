//! Client-side half of the pub/sub transport (spec §4.4): a persistent
//! websocket with automatic reconnect, full resubscribe on every connect,
//! and best-effort publish that queues while disconnected.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use opal_retry::{RetryStrategyConfig, calculate_delay};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::error::Result;
use crate::protocol::{ClientMessage, ServerMessage};

pub type NotifyHandler = Arc<dyn Fn(String, serde_json::Value) + Send + Sync>;
pub type ConnectHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Deserialize)]
pub struct PubSubClientConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub reconnect: RetryStrategyConfig,
    /// How often to send a websocket ping so a dead connection (no traffic
    /// otherwise) is detected promptly, matching the original's
    /// `KEEP_ALIVE_INTERVAL`.
    #[serde(default = "default_keepalive_interval", with = "humantime_serde")]
    pub keepalive_interval: Duration,
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(30)
}

pub struct PubSubClient {
    config: PubSubClientConfig,
    on_notify: NotifyHandler,
    on_connect: Vec<ConnectHandler>,
}

impl PubSubClient {
    pub fn new(config: PubSubClientConfig, on_notify: NotifyHandler) -> Self {
        Self {
            config,
            on_notify,
            on_connect: Vec::new(),
        }
    }

    /// Registers a handler invoked after every (re)connect, once the RPC
    /// channel is usable — after resubscribing, before delivering messages.
    pub fn on_connect(mut self, handler: ConnectHandler) -> Self {
        self.on_connect.push(handler);
        self
    }

    /// Spawns the reconnect loop and returns a handle for publishing.
    pub fn spawn(self) -> PubSubClientHandle {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_loop(self.config, self.on_notify, self.on_connect, rx));
        PubSubClientHandle { outbound: tx }
    }
}

#[derive(Clone)]
pub struct PubSubClientHandle {
    outbound: mpsc::Sender<ClientMessage>,
}

impl PubSubClientHandle {
    /// Best-effort publish; queued until the client is connected.
    pub async fn publish(&self, topics: Vec<String>, data: serde_json::Value) {
        let _ = self
            .outbound
            .send(ClientMessage::Publish { topics, data })
            .await;
    }
}

async fn run_loop(
    config: PubSubClientConfig,
    on_notify: NotifyHandler,
    on_connect: Vec<ConnectHandler>,
    mut outbound_rx: mpsc::Receiver<ClientMessage>,
) {
    let mut attempt = 1u32;
    loop {
        match connect_and_run(&config, &on_notify, &on_connect, &mut outbound_rx).await {
            Ok(()) => {
                tracing::info!("pub/sub connection closed, reconnecting");
                attempt = 1;
            }
            Err(error) => {
                tracing::warn!(%error, attempt, "pub/sub connect failed");
                attempt += 1;
            }
        }
        let delay = calculate_delay(&config.reconnect, attempt);
        tokio::time::sleep(delay).await;
    }
}

async fn connect_and_run(
    config: &PubSubClientConfig,
    on_notify: &NotifyHandler,
    on_connect: &[ConnectHandler],
    outbound_rx: &mut mpsc::Receiver<ClientMessage>,
) -> Result<()> {
    let mut url = Url::parse(&config.url)?;
    if let Some(token) = &config.token {
        url.query_pairs_mut().append_pair("token", token);
    }

    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws_stream.split();

    if !config.topics.is_empty() {
        let subscribe = ClientMessage::Subscribe {
            topics: config.topics.clone(),
        };
        sink.send(WsMessage::Text(serde_json::to_string(&subscribe)?))
            .await?;
    }

    for handler in on_connect {
        handler();
    }

    let mut keepalive = tokio::time::interval(config.keepalive_interval);
    keepalive.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(ServerMessage::Notify { subscription, data }) =
                            serde_json::from_str::<ServerMessage>(&text)
                        {
                            on_notify(strip_scope_prefix(&subscription), data);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return Err(error.into()),
                }
            }
            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else { return Ok(()) };
                sink.send(WsMessage::Text(serde_json::to_string(&message)?)).await?;
            }
            _ = keepalive.tick() => {
                sink.send(WsMessage::Ping(Vec::new())).await?;
            }
        }
    }
}

fn strip_scope_prefix(topic: &str) -> String {
    match topic.split_once(':') {
        Some((scope, rest)) if !scope.is_empty() && !scope.contains('/') => rest.to_string(),
        _ => topic.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_scope_prefix_removes_scope() {
        assert_eq!(strip_scope_prefix("s:a/b"), "a/b");
    }

    #[test]
    fn strip_scope_prefix_leaves_unscoped_topics() {
        assert_eq!(strip_scope_prefix("a/b"), "a/b");
    }
}
