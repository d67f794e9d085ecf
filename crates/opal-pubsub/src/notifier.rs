//! In-process topic notifier: `topic -> subscriber set` plus the reverse
//! index needed for O(1) disconnect cleanup.
//!
//! Subscribers are message-passing endpoints (a bounded channel each) per
//! the design note against direct callback invocation: one slow subscriber
//! then can't block delivery to the others, and there is no unbounded
//! re-entrancy across modules publishing from inside a notification.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::error::{PubSubError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub topic: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum NotifierEvent {
    Subscribed { subscriber_id: String, topic: String },
    Unsubscribed { subscriber_id: String, topic: String },
}

/// Restricts which topics a subscriber may subscribe to, given the caller's
/// permitted-topics set (from JWT claims, typically). Returns the subset of
/// `topics` that is NOT permitted; an empty result means the request is
/// fully authorized.
pub type ChannelRestriction = Arc<dyn Fn(&[String], &[String]) -> Vec<String> + Send + Sync>;

struct Subscription {
    subscriber_id: String,
    topic: String,
    sender: mpsc::Sender<Notification>,
}

#[derive(Default)]
struct Inner {
    topics: DashMap<String, HashSet<Uuid>>,
    subscriptions: DashMap<Uuid, Subscription>,
    subscriber_index: DashMap<String, HashSet<Uuid>>,
}

pub struct Notifier {
    inner: Arc<Inner>,
    restriction: Option<ChannelRestriction>,
    events: broadcast::Sender<NotifierEvent>,
}

impl Clone for Notifier {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            restriction: self.restriction.clone(),
            events: self.events.clone(),
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner::default()),
            restriction: None,
            events,
        }
    }

    pub fn with_channel_restriction(mut self, predicate: ChannelRestriction) -> Self {
        self.restriction = Some(predicate);
        self
    }

    pub fn events(&self) -> broadcast::Receiver<NotifierEvent> {
        self.events.subscribe()
    }

    /// Registers `subscriber_id` for every topic in `topics`, delivering
    /// matching notifications on `sender`. Duplicate (subscriber_id, topic)
    /// pairs are idempotent.
    ///
    /// When `permitted_topics` is `Some` (the caller's claims carried a
    /// restriction), every topic in `topics` not present in it is rejected.
    /// An additional channel-restriction predicate, if configured via
    /// [`Self::with_channel_restriction`], is consulted on top of that.
    /// Either check failing means no topic in the request is registered.
    pub fn subscribe(
        &self,
        subscriber_id: &str,
        permitted_topics: Option<&[String]>,
        topics: &[String],
        sender: mpsc::Sender<Notification>,
    ) -> Result<()> {
        if let Some(permitted) = permitted_topics {
            let denied: Vec<String> = topics
                .iter()
                .filter(|t| !permitted.contains(t))
                .cloned()
                .collect();
            if !denied.is_empty() {
                return Err(PubSubError::Unauthorized(denied));
            }
        }
        if let (Some(restriction), Some(permitted)) = (&self.restriction, permitted_topics) {
            let denied = restriction(permitted, topics);
            if !denied.is_empty() {
                return Err(PubSubError::Unauthorized(denied));
            }
        }

        for topic in topics {
            let id = self.existing_subscription(subscriber_id, topic).unwrap_or_else(|| {
                let id = Uuid::new_v4();
                self.inner.subscriptions.insert(
                    id,
                    Subscription {
                        subscriber_id: subscriber_id.to_string(),
                        topic: topic.clone(),
                        sender: sender.clone(),
                    },
                );
                self.inner
                    .topics
                    .entry(topic.clone())
                    .or_default()
                    .insert(id);
                self.inner
                    .subscriber_index
                    .entry(subscriber_id.to_string())
                    .or_default()
                    .insert(id);
                let _ = self.events.send(NotifierEvent::Subscribed {
                    subscriber_id: subscriber_id.to_string(),
                    topic: topic.clone(),
                });
                id
            });
            let _ = id;
        }
        Ok(())
    }

    fn existing_subscription(&self, subscriber_id: &str, topic: &str) -> Option<Uuid> {
        let ids = self.inner.subscriber_index.get(subscriber_id)?;
        ids.iter()
            .find(|id| {
                self.inner
                    .subscriptions
                    .get(id)
                    .is_some_and(|s| s.topic == topic)
            })
            .copied()
    }

    pub fn unsubscribe_all(&self, subscriber_id: &str) {
        if let Some((_, ids)) = self.inner.subscriber_index.remove(subscriber_id) {
            for id in ids {
                self.remove_subscription(id, subscriber_id);
            }
        }
    }

    pub fn unsubscribe(&self, subscriber_id: &str, topics: &[String]) {
        for topic in topics {
            if let Some(id) = self.existing_subscription(subscriber_id, topic) {
                self.remove_subscription(id, subscriber_id);
                if let Some(mut ids) = self.inner.subscriber_index.get_mut(subscriber_id) {
                    ids.remove(&id);
                }
            }
        }
    }

    fn remove_subscription(&self, id: Uuid, subscriber_id: &str) {
        if let Some((_, sub)) = self.inner.subscriptions.remove(&id) {
            if let Some(mut ids) = self.inner.topics.get_mut(&sub.topic) {
                ids.remove(&id);
            }
            let _ = self.events.send(NotifierEvent::Unsubscribed {
                subscriber_id: subscriber_id.to_string(),
                topic: sub.topic,
            });
        }
    }

    /// Delivers `data` to every subscriber of every topic in `topics`.
    /// Deliveries run concurrently relative to each other; delivery to a
    /// single subscriber is serialized by its channel. A topic with no
    /// subscribers at publish time silently drops the message.
    pub async fn publish(&self, topics: &[String], data: serde_json::Value) {
        let mut sends = Vec::new();
        for topic in topics {
            let Some(ids) = self.inner.topics.get(topic) else {
                continue;
            };
            for id in ids.iter() {
                if let Some(sub) = self.inner.subscriptions.get(id) {
                    let notification = Notification {
                        topic: topic.clone(),
                        data: data.clone(),
                    };
                    sends.push(sub.sender.clone().send_owned(notification));
                }
            }
        }
        futures_util::future::join_all(sends).await;
    }
}

trait SendOwned {
    fn send_owned(
        self,
        notification: Notification,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;
}

impl SendOwned for mpsc::Sender<Notification> {
    fn send_owned(
        self,
        notification: Notification,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            if self.send(notification).await.is_err() {
                tracing::debug!("subscriber channel closed, dropping notification");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_subscribed_topic() {
        let notifier = Notifier::new();
        let (tx, mut rx) = mpsc::channel(8);
        notifier
            .subscribe("client-1", None, &["policy:a".to_string()], tx)
            .unwrap();

        notifier
            .publish(&["policy:a".to_string()], serde_json::json!({"hash": "abc"}))
            .await;

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.topic, "policy:a");
    }

    #[tokio::test]
    async fn publish_to_unsubscribed_topic_is_a_noop() {
        let notifier = Notifier::new();
        let (tx, mut rx) = mpsc::channel(8);
        notifier
            .subscribe("client-1", None, &["policy:a".to_string()], tx)
            .unwrap();

        notifier
            .publish(&["policy:b".to_string()], serde_json::json!({}))
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_subscribe_is_idempotent() {
        let notifier = Notifier::new();
        let (tx, mut rx) = mpsc::channel(8);
        notifier
            .subscribe("client-1", None, &["policy:a".to_string()], tx.clone())
            .unwrap();
        notifier
            .subscribe("client-1", None, &["policy:a".to_string()], tx)
            .unwrap();

        notifier
            .publish(&["policy:a".to_string()], serde_json::json!({}))
            .await;

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_all_stops_delivery() {
        let notifier = Notifier::new();
        let (tx, mut rx) = mpsc::channel(8);
        notifier
            .subscribe("client-1", None, &["policy:a".to_string()], tx)
            .unwrap();
        notifier.unsubscribe_all("client-1");

        notifier
            .publish(&["policy:a".to_string()], serde_json::json!({}))
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn channel_restriction_rejects_unauthorized_topics() {
        let restriction: ChannelRestriction = Arc::new(|permitted, requested| {
            requested
                .iter()
                .filter(|t| !permitted.contains(t))
                .cloned()
                .collect()
        });
        let notifier = Notifier::new().with_channel_restriction(restriction);
        let (tx, _rx) = mpsc::channel(8);

        let permitted = vec!["policy:.".to_string()];
        let requested = vec!["policy:.".to_string(), "secret".to_string()];
        let result = notifier.subscribe("client-1", Some(&permitted), &requested, tx);
        assert!(matches!(result, Err(PubSubError::Unauthorized(_))));
    }
}
