//! HTTP-backed [`Store`] talking to an OPA-compatible policy engine sidecar.
//!
//! `PUT /v1/policies/{id}`, `PUT /v1/data/{path}`,
//! `PATCH /v1/data/{path}` (`application/json-patch+json`),
//! `POST /v1/data/{path}` with `{"input": ...}` for evaluation.

use async_trait::async_trait;
use json_patch::Patch;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use opal_core::{StoreTransaction, TransactionLogState, TransactionType};
use opal_retry::{RetryExecutor, RetryPolicy};

use crate::cache::DataCache;
use crate::error::{Result, StoreError};
use crate::ignore::PathIgnoreList;
use crate::traits::{Store, Transaction};

#[derive(Clone, Deserialize)]
pub struct HttpStoreConfig {
    pub base_url: String,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub static_data_cache: bool,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8181".to_string(),
            retry_policy: RetryPolicy::Default,
            ignore_patterns: Vec::new(),
            static_data_cache: false,
        }
    }
}

pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    retry: RetryExecutor,
    ignore: PathIgnoreList,
    cache: Option<DataCache>,
    log: AsyncMutex<TransactionLogState>,
    lock: AsyncMutex<()>,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> std::result::Result<Self, globset::Error> {
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: RetryExecutor::from_policy(config.retry_policy),
            ignore: PathIgnoreList::new(&config.ignore_patterns)?,
            cache: config.static_data_cache.then(DataCache::new),
            log: AsyncMutex::new(TransactionLogState::default()),
            lock: AsyncMutex::new(()),
        })
    }

    pub async fn log_state(&self) -> TransactionLogState {
        self.log.lock().await.clone()
    }

    /// A full-tree export of the mirrored data cache, when enabled.
    pub fn snapshot(&self) -> Option<Value> {
        self.cache.as_ref().map(DataCache::snapshot)
    }

    fn policy_url(&self, id: &str) -> String {
        format!("{}/v1/policies/{}", self.base_url, id)
    }

    fn data_url(&self, path: &str) -> String {
        format!("{}/v1/data/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Store for HttpStore {
    async fn set_policy(&self, id: &str, source: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let url = self.policy_url(id);
        let response = self
            .retry
            .run(|attempt| {
                let client = &self.client;
                let url = &url;
                async move {
                    let response = client
                        .put(url)
                        .header("content-type", "text/plain")
                        .body(source.to_string())
                        .send()
                        .await?;
                    classify_response(response, attempt).await
                }
            })
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::BAD_REQUEST => {
                let message = response.text().await.unwrap_or_default();
                Err(StoreError::InvalidPolicySource {
                    id: id.to_string(),
                    message,
                })
            }
            Ok(response) => {
                ensure_success(response, &url).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn delete_policy(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let url = self.policy_url(id);
        let response = self
            .retry
            .run(|attempt| {
                let client = &self.client;
                let url = &url;
                async move {
                    let response = client.delete(url).send().await?;
                    classify_response(response, attempt).await
                }
            })
            .await?;
        ensure_success(response, &url).await
    }

    async fn get_policy(&self, id: &str) -> Result<Option<String>> {
        let url = self.policy_url(id);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.text().await?))
    }

    async fn list_policy_ids(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1/policies", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        let ids = body
            .get("result")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn set_data(&self, path: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        if self.ignore.is_ignored(path) {
            return Ok(());
        }
        let url = self.data_url(path);
        let response = self
            .retry
            .run(|attempt| {
                let client = &self.client;
                let url = &url;
                let value = value.clone();
                async move {
                    let response = client.put(url).json(&value).send().await?;
                    classify_response(response, attempt).await
                }
            })
            .await?;
        ensure_success(response, &url).await?;
        if let Some(cache) = &self.cache {
            cache.set(path, value);
        }
        Ok(())
    }

    async fn delete_data(&self, path: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        if self.ignore.is_ignored(path) {
            return Ok(());
        }
        let url = self.data_url(path);
        let response = self
            .retry
            .run(|attempt| {
                let client = &self.client;
                let url = &url;
                async move {
                    let response = client.delete(url).send().await?;
                    classify_response(response, attempt).await
                }
            })
            .await?;
        ensure_success(response, &url).await?;
        if let Some(cache) = &self.cache {
            cache.delete(path);
        }
        Ok(())
    }

    async fn patch_data(&self, path: &str, patch: &Patch) -> Result<()> {
        let _guard = self.lock.lock().await;
        if self.ignore.is_ignored(path) {
            return Ok(());
        }
        let url = self.data_url(path);
        let response = self
            .retry
            .run(|attempt| {
                let client = &self.client;
                let url = &url;
                let patch = patch.clone();
                async move {
                    let response = client
                        .patch(url)
                        .header("content-type", "application/json-patch+json")
                        .json(&patch)
                        .send()
                        .await?;
                    classify_response(response, attempt).await
                }
            })
            .await?;
        ensure_success(response, &url).await?;
        if let Some(cache) = &self.cache {
            let mut current = cache.get(path);
            json_patch::patch(&mut current, patch)?;
            cache.set(path, current);
        }
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<Value> {
        let url = self.data_url(path);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn evaluate(&self, path: &str, input: Value) -> Result<Value> {
        let url = self.data_url(path);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "input": input }))
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    fn transaction(&self, transaction_type: TransactionType) -> Transaction {
        Transaction::open(transaction_type)
    }

    async fn record_transaction(&self, tx: StoreTransaction) {
        self.log.lock().await.record(tx);
    }
}

/// Turns 5xx responses into an `Err` the retry executor will retry; 4xx
/// responses pass through as `Ok` so the caller can inspect and classify
/// them (e.g. `400` on `set_policy` is terminal, not retried).
async fn classify_response(
    response: reqwest::Response,
    attempt: u32,
) -> std::result::Result<reqwest::Response, StoreError> {
    if response.status().is_server_error() {
        warn!(attempt, status = %response.status(), "store write failed, retrying");
        return Err(StoreError::UpstreamStatus {
            status: response.status().as_u16(),
            path: response.url().path().to_string(),
        });
    }
    Ok(response)
}

async fn ensure_success(response: reqwest::Response, url: &str) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(StoreError::UpstreamStatus {
        status: response.status().as_u16(),
        path: url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn set_policy_succeeds_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/policies/rbac"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = HttpStore::new(HttpStoreConfig {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();
        store.set_policy("rbac", "package app.rbac").await.unwrap();
    }

    #[tokio::test]
    async fn set_policy_400_is_terminal_invalid_source() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/policies/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("parse error"))
            .mount(&server)
            .await;

        let store = HttpStore::new(HttpStoreConfig {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();
        let err = store.set_policy("bad", "not rego").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPolicySource { .. }));
    }

    #[tokio::test]
    async fn set_data_silently_skips_ignored_path() {
        // No mock mounted: a write reaching the HTTP layer would panic the
        // mock server with an unexpected-request error, so success here
        // proves the write never left the ignore check.
        let server = MockServer::start().await;
        let store = HttpStore::new(HttpStoreConfig {
            base_url: server.uri(),
            ignore_patterns: vec!["secrets/*".to_string()],
            ..Default::default()
        })
        .unwrap();
        store.set_data("secrets/token", json!("x")).await.unwrap();
    }

    #[tokio::test]
    async fn set_data_mirrors_into_static_cache() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/data/a/b"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let store = HttpStore::new(HttpStoreConfig {
            base_url: server.uri(),
            static_data_cache: true,
            ..Default::default()
        })
        .unwrap();
        store.set_data("a/b", json!(42)).await.unwrap();
        assert_eq!(store.snapshot().unwrap(), json!({"a": {"b": 42}}));
    }
}
