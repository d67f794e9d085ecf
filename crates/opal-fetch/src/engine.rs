//! Bounded concurrent fetch queue (spec §4.9). N long-lived workers pull
//! events off an mpsc queue, resolve a provider per event, and retry the
//! fetch under the aggressive policy before giving up and invoking the
//! failure hook.

use std::sync::Arc;

use opal_core::FetchEvent;
use opal_retry::{RetryExecutor, RetryPolicy};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::error::{FetchError, Result};
use crate::provider::ProviderRegistry;

pub type FetchCallback = Arc<dyn Fn(Result<Value>) + Send + Sync>;
pub type FailureHook = Arc<dyn Fn(&FetchError, &FetchEvent) + Send + Sync>;

struct Job {
    event: FetchEvent,
    callback: FetchCallback,
}

#[derive(Clone)]
pub struct FetchEngineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry_policy: RetryPolicy,
}

impl Default for FetchEngineConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 1000,
            retry_policy: RetryPolicy::Aggressive,
        }
    }
}

/// The live, running engine. Drop or call [`FetchEngine::shutdown`] to stop
/// accepting new work and let in-flight jobs drain.
#[derive(Clone)]
pub struct FetchEngine {
    tx: mpsc::Sender<Job>,
    registry: Arc<ProviderRegistry>,
}

impl FetchEngine {
    pub fn start(config: FetchEngineConfig, registry: ProviderRegistry) -> Self {
        Self::start_with_failure_hook(config, registry, None)
    }

    pub fn start_with_failure_hook(
        config: FetchEngineConfig,
        registry: ProviderRegistry,
        on_failure: Option<FailureHook>,
    ) -> Self {
        let registry = Arc::new(registry);
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let retry = Arc::new(RetryExecutor::from_policy(config.retry_policy));

        for worker_id in 0..config.workers {
            let rx = rx.clone();
            let registry = registry.clone();
            let retry = retry.clone();
            let on_failure = on_failure.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else {
                        break;
                    };
                    run_job(worker_id, job, &registry, &retry, on_failure.as_ref()).await;
                }
            });
        }

        Self { tx, registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Enqueues a plain URL fetch using the `http_get` provider.
    pub async fn enqueue_url(
        &self,
        url: impl Into<String>,
        config: Value,
        callback: FetchCallback,
    ) -> Result<FetchEvent> {
        let event = FetchEvent::new("http_get", url.into(), config);
        self.enqueue_event(event.clone(), callback).await?;
        Ok(event)
    }

    /// Enqueues a fully constructed event, dispatched to whichever provider
    /// `event.fetcher_name` names.
    pub async fn enqueue_event(&self, event: FetchEvent, callback: FetchCallback) -> Result<()> {
        self.tx
            .send(Job { event, callback })
            .await
            .map_err(|_| FetchError::ShuttingDown)
    }

    /// Stops accepting new jobs. Existing workers drain remaining queued
    /// jobs and exit once the channel is empty and closed.
    pub fn shutdown(self) {
        drop(self.tx);
    }

    /// Enqueues a job and waits for its result, for callers that want a
    /// simple request/response shape instead of a callback.
    pub async fn fetch(&self, event: FetchEvent) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        // The oneshot sender only supports FnOnce; the trait object needs
        // Fn, so a Mutex<Option<..>> lets the callback fire exactly once.
        let tx = std::sync::Mutex::new(Some(tx));
        let callback: FetchCallback = Arc::new(move |result| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(result);
            }
        });
        self.enqueue_event(event, callback).await?;
        rx.await.map_err(|_| FetchError::ShuttingDown)?
    }
}

async fn run_job(
    worker_id: usize,
    job: Job,
    registry: &ProviderRegistry,
    retry: &RetryExecutor,
    on_failure: Option<&FailureHook>,
) {
    let Job { event, callback } = job;
    let provider = match registry.build(&event) {
        Ok(provider) => provider,
        Err(err) => {
            warn!(worker_id, event_id = %event.id, %err, "no provider for fetch event");
            if let Some(hook) = on_failure {
                hook(&err, &event);
            }
            callback(Err(err));
            return;
        }
    };

    let result = retry
        .run(|attempt| {
            let provider = provider.clone();
            async move {
                if attempt > 1 {
                    warn!(attempt, "retrying fetch");
                }
                provider.fetch().await
            }
        })
        .await;

    match result {
        Ok(value) => callback(Ok(value)),
        Err(err) => {
            error!(worker_id, event_id = %event.id, %err, "fetch exhausted retries");
            if let Some(hook) = on_failure {
                hook(&err, &event);
            }
            callback(Err(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn enqueue_url_invokes_callback() {
        let registry = ProviderRegistry::new();
        let engine = FetchEngine::start(
            FetchEngineConfig {
                workers: 2,
                queue_capacity: 16,
                retry_policy: RetryPolicy::Aggressive,
            },
            registry,
        );

        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let callback: FetchCallback = Arc::new(move |result| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(result);
            }
        });

        engine
            .enqueue_url("http://127.0.0.1:1/unreachable", Value::Null, callback)
            .await
            .unwrap();

        let result = rx.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_provider_invokes_failure_hook() {
        let registry = ProviderRegistry::new();
        let failures = Arc::new(AtomicUsize::new(0));
        let failures_clone = failures.clone();
        let engine = FetchEngine::start_with_failure_hook(
            FetchEngineConfig {
                workers: 1,
                queue_capacity: 4,
                retry_policy: RetryPolicy::Aggressive,
            },
            registry,
            Some(Arc::new(move |_err, _event| {
                failures_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let event = FetchEvent::new("no_such_provider", "http://example.com", Value::Null);
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let callback: FetchCallback = Arc::new(move |result| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(result);
            }
        });
        engine.enqueue_event(event, callback).await.unwrap();
        let result = rx.await.unwrap();
        assert!(result.is_err());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enqueue_after_receiver_dropped_errors() {
        let (tx, rx) = mpsc::channel::<Job>(1);
        drop(rx);
        let engine = FetchEngine {
            tx,
            registry: Arc::new(ProviderRegistry::new()),
        };
        let result = engine
            .enqueue_event(
                FetchEvent::new("http_get", "http://example.com", Value::Null),
                Arc::new(|_| {}),
            )
            .await;
        assert!(matches!(result, Err(FetchError::ShuttingDown)));
    }
}
