//! Layered `ServerConfig`/`ClientConfig`. Each field reuses the config type
//! already owned by the crate that consumes it (`opal_policy::GitSourceConfig`,
//! `opal_pubsub::RedisFanoutConfig`, ...) rather than re-declaring parallel
//! structs, so a change to one component's knobs doesn't require a second
//! edit here.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use opal_auth::JwtSignerConfig;
use opal_core::DataSourceEntry;
use opal_policy::{GitSourceConfig, LeaderLockConfig, WebhookConfig};
use opal_pubsub::RedisFanoutConfig;
use opal_store::HttpStoreConfig;
use opal_transport::PubSubClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySourceKind {
    Git,
    BundleUrl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleUrlSourceSettings {
    pub bundle_url: String,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicySourceSettings {
    pub kind: PolicySourceKind,
    #[serde(default)]
    pub git: Option<GitSourceConfig>,
    #[serde(default)]
    pub bundle_url: Option<BundleUrlSourceSettings>,
    #[serde(default = "default_polling_interval", with = "humantime_serde")]
    pub polling_interval: Duration,
}

fn default_polling_interval() -> Duration {
    Duration::from_secs(30)
}

/// Raw glob patterns for `BundleMaker::bundle_ignore`; compiled into a
/// `GlobSet` by the binary that owns the `BundleMaker` instance, since
/// `GlobSet` itself has no `Deserialize` impl.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleMakerSettings {
    #[serde(default = "default_policy_extension")]
    pub policy_extension: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub in_directories: Vec<PathBuf>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_policy_extension() -> String {
    "rego".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchEngineSettings {
    #[serde(default = "default_fetch_workers")]
    pub workers: usize,
    #[serde(default = "default_fetch_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_fetch_workers() -> usize {
    10
}

fn default_fetch_queue_capacity() -> usize {
    1000
}

impl Default for FetchEngineSettings {
    fn default() -> Self {
        Self {
            workers: default_fetch_workers(),
            queue_capacity: default_fetch_queue_capacity(),
        }
    }
}

/// Server-process configuration: Pub/Sub Endpoint, Leader-Lock-gated Policy
/// Source watcher, Bundle Maker, Webhook Intake.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub broadcaster: RedisFanoutConfig,
    pub policy_source: PolicySourceSettings,
    #[serde(default)]
    pub bundle_maker: BundleMakerSettings,
    #[serde(default)]
    pub leader_lock: LeaderLockConfig,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub auth: JwtSignerConfig,
    #[serde(default)]
    pub statistics_enabled: bool,
    #[serde(default)]
    pub healthcheck_policy_enabled: bool,
    /// Served verbatim by `POST /data/config` as the bootstrap set of data
    /// sources a freshly-connected client should fetch.
    #[serde(default)]
    pub bootstrap_data_sources: Vec<DataSourceEntry>,
}

fn default_bind_address() -> String {
    "0.0.0.0:7002".to_string()
}

/// Client-process configuration: Pub/Sub Client, Policy Updater, Data Fetch
/// Engine + Data Updater, Store handle.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub pubsub: PubSubClientConfig,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    pub store: HttpStoreConfig,
    #[serde(default)]
    pub fetch: FetchEngineSettings,
    #[serde(default)]
    pub policy_topics: Vec<String>,
    #[serde(default)]
    pub data_topics: Vec<String>,
    #[serde(default)]
    pub report_on_data_updates: bool,
    #[serde(default)]
    pub healthcheck_policy_enabled: bool,
}

fn default_server_url() -> String {
    "http://127.0.0.1:7002".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_deserializes_minimal_toml() {
        let toml = r#"
            [policy_source]
            kind = "git"

            [policy_source.git]
            repo_url = "https://example.com/repo.git"
            clone_path = "/tmp/opal-repo"
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:7002");
        assert_eq!(config.policy_source.kind, PolicySourceKind::Git);
        assert_eq!(
            config.policy_source.git.unwrap().repo_url,
            "https://example.com/repo.git"
        );
    }

    #[test]
    fn client_config_deserializes_minimal_toml() {
        let toml = r#"
            [pubsub]
            url = "ws://127.0.0.1:7002/ws"

            [store]
            base_url = "http://127.0.0.1:8181"
        "#;
        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server_url, "http://127.0.0.1:7002");
        assert_eq!(config.fetch.workers, 10);
    }
}
