//! Client composition: `ClientBuilder` turns a `ClientConfig` into a running
//! `OpalClient`, mirroring the teacher's `ServerBuilder`/`AppState` shape
//! (`server.rs`) on the client side: one Pub/Sub Client, one Policy Updater,
//! one Data Updater backed by the Data Fetch Engine, all sharing a single
//! `Arc<HttpStore>` handle.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use opal_config::ClientConfig;
use opal_core::DataUpdate;
use opal_fetch::{FetchEngine, FetchEngineConfig, ProviderRegistry};
use opal_store::{DEFAULT_HEALTHCHECK_PATH, HttpStore, publish_healthcheck};
use opal_transport::{ConnectHandler, NotifyHandler, PubSubClient, PubSubClientConfig, PubSubClientHandle};

use crate::data_updater::DataUpdater;
use crate::policy_updater::PolicyUpdater;

const HEALTHCHECK_PUBLISH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

pub struct OpalClient {
    _handle: PubSubClientHandle,
    store: Arc<HttpStore>,
}

impl OpalClient {
    pub async fn run(self) -> anyhow::Result<()> {
        tokio::signal::ctrl_c().await?;
        tracing::info!("shutdown signal received");
        Ok(())
    }

    pub fn store(&self) -> &Arc<HttpStore> {
        &self.store
    }
}

pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn build(self) -> anyhow::Result<OpalClient> {
        let config = self.config;

        let store = Arc::new(
            HttpStore::new(config.store.clone()).context("invalid store ignore_patterns")?,
        );

        let policy_updater = Arc::new(PolicyUpdater::new(
            config.server_url.clone(),
            config.pubsub.token.clone(),
            store.clone(),
        ));

        let fetch_engine = FetchEngine::start(
            FetchEngineConfig {
                workers: config.fetch.workers,
                queue_capacity: config.fetch.queue_capacity,
                ..FetchEngineConfig::default()
            },
            ProviderRegistry::new(),
        );
        let data_updater = Arc::new(DataUpdater::new(
            fetch_engine,
            store.clone(),
            config.report_on_data_updates,
        ));

        let policy_dirs: HashSet<String> = config.policy_topics.iter().cloned().collect();

        let subscribe_topics: Vec<String> = config
            .policy_topics
            .iter()
            .map(|dir| format!("policy:{dir}"))
            .chain(config.data_topics.iter().cloned())
            .collect();
        let pubsub_config = PubSubClientConfig {
            topics: subscribe_topics,
            ..config.pubsub.clone()
        };

        let on_notify = build_notify_handler(policy_dirs, policy_updater.clone(), data_updater.clone());
        let on_connect = build_connect_handler(
            config.policy_topics.clone(),
            config.server_url.clone(),
            config.pubsub.token.clone(),
            policy_updater,
            data_updater,
        );

        let client = PubSubClient::new(pubsub_config, on_notify).on_connect(on_connect);
        let handle = client.spawn();

        tokio::spawn(run_healthcheck_loop(
            store.clone(),
            config.healthcheck_policy_enabled,
        ));

        Ok(OpalClient {
            _handle: handle,
            store,
        })
    }
}

/// Periodically writes the `{ready, healthy}` healthcheck document derived
/// from the store's own transaction log back into the store, the same way
/// any other data document is written.
async fn run_healthcheck_loop(store: Arc<HttpStore>, policy_updater_enabled: bool) {
    let mut ticker = tokio::time::interval(HEALTHCHECK_PUBLISH_INTERVAL);
    loop {
        ticker.tick().await;
        let log = store.log_state().await;
        publish_healthcheck(
            store.as_ref(),
            DEFAULT_HEALTHCHECK_PATH,
            &log,
            policy_updater_enabled,
            true,
        )
        .await;
    }
}

fn build_notify_handler(
    policy_dirs: HashSet<String>,
    policy_updater: Arc<PolicyUpdater>,
    data_updater: Arc<DataUpdater>,
) -> NotifyHandler {
    Arc::new(move |topic, data| {
        let policy_dirs = policy_dirs.clone();
        let policy_updater = policy_updater.clone();
        let data_updater = data_updater.clone();
        tokio::spawn(async move {
            if policy_dirs.contains(&topic) {
                policy_updater.handle_notification(&topic, &data).await;
                return;
            }
            match serde_json::from_value::<DataUpdate>(data) {
                Ok(update) => data_updater.handle_update(update).await,
                Err(err) => tracing::warn!(%err, topic, "data notification payload invalid"),
            }
        });
    })
}

fn build_connect_handler(
    policy_dirs: Vec<String>,
    server_url: String,
    token: Option<String>,
    policy_updater: Arc<PolicyUpdater>,
    data_updater: Arc<DataUpdater>,
) -> ConnectHandler {
    Arc::new(move || {
        let policy_dirs = policy_dirs.clone();
        let server_url = server_url.clone();
        let token = token.clone();
        let policy_updater = policy_updater.clone();
        let data_updater = data_updater.clone();
        tokio::spawn(async move {
            policy_updater.full_resync(&policy_dirs).await;
            data_updater.bootstrap(&server_url, token.as_deref()).await;
        });
    })
}
