//! Data Updater (spec §4.11): fetches each entry of a `DataUpdate` through
//! the Data Fetch Engine and writes the result into the Store under a data
//! transaction, optionally reporting per-entry outcomes to a callback URL.

use std::sync::Arc;

use futures_util::future::join_all;
use opal_core::{
    DataEntryReport, DataSourceEntry, DataUpdate, DataUpdateReport, FetchEvent,
    ServerDataSourceConfig, SaveMethod, TransactionType,
};
use opal_fetch::FetchEngine;
use opal_store::{HttpStore, Store};
use serde_json::{Value, json};

use crate::policy_updater::normalize_data_path;

pub struct DataUpdater {
    fetch: FetchEngine,
    store: Arc<HttpStore>,
    http: reqwest::Client,
    report_on_data_updates: bool,
}

impl DataUpdater {
    pub fn new(fetch: FetchEngine, store: Arc<HttpStore>, report_on_data_updates: bool) -> Self {
        Self {
            fetch,
            store,
            http: reqwest::Client::new(),
            report_on_data_updates,
        }
    }

    /// Fetches the bootstrap data-source list and applies it as a synthetic
    /// update. Run once per connect, before relying on incremental
    /// `/data/update` notifications (spec §4.11).
    pub async fn bootstrap(&self, server_url: &str, token: Option<&str>) {
        let url = format!("{server_url}/data/config");
        let mut request = self.http.post(&url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let config: ServerDataSourceConfig = match request.send().await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.json().await {
                    Ok(config) => config,
                    Err(err) => {
                        tracing::warn!(%err, "bootstrap data config body invalid");
                        return;
                    }
                },
                Err(err) => {
                    tracing::warn!(%err, "bootstrap data config request failed");
                    return;
                }
            },
            Err(err) => {
                tracing::warn!(%err, "bootstrap data config request failed");
                return;
            }
        };

        self.handle_update(DataUpdate {
            id: uuid::Uuid::new_v4(),
            entries: config.entries,
            reason: "bootstrap".to_string(),
            callback: None,
        })
        .await;
    }

    pub async fn handle_update(&self, update: DataUpdate) {
        let fetches = update.entries.iter().map(|entry| self.fetch_entry(entry));
        let fetched: Vec<(DataSourceEntry, opal_fetch::error::Result<Value>)> = join_all(fetches).await;

        let mut tx = self.store.transaction(TransactionType::Data);
        let mut report = DataUpdateReport::new(&update);

        for (entry, fetch_result) in fetched {
            let outcome = match fetch_result {
                Ok(value) => self.write_entry(&entry, value).await,
                Err(err) => Err(err.to_string()),
            };

            match outcome {
                Ok(()) => {
                    tx.record_action(format!("set_data {}", entry.dst_path));
                    report.entries.push(DataEntryReport {
                        dst_path: entry.dst_path.clone(),
                        success: true,
                        error: None,
                    });
                }
                Err(error) => {
                    report.entries.push(DataEntryReport {
                        dst_path: entry.dst_path.clone(),
                        success: false,
                        error: Some(error),
                    });
                }
            }
        }

        let success = report.entries.iter().all(|entry| entry.success);
        let error = (!success).then(|| "one or more data entries failed".to_string());
        let record = tx.finish(success, error);
        self.store.record_transaction(record).await;

        if self.report_on_data_updates {
            if let Some(callback) = &update.callback {
                if let Err(err) = self.http.post(callback).json(&report).send().await {
                    tracing::warn!(%err, callback, "data update callback delivery failed");
                }
            }
        }
    }

    async fn fetch_entry(
        &self,
        entry: &DataSourceEntry,
    ) -> (DataSourceEntry, opal_fetch::error::Result<Value>) {
        let fetcher_name = entry
            .config
            .get("fetcher_name")
            .and_then(Value::as_str)
            .unwrap_or("http_get")
            .to_string();
        let event = FetchEvent::new(fetcher_name, entry.url.clone(), entry.config.clone());
        (entry.clone(), self.fetch.fetch(event).await)
    }

    async fn write_entry(&self, entry: &DataSourceEntry, value: Value) -> Result<(), String> {
        let path = normalize_data_path(&entry.dst_path);
        let result = match entry.save_method {
            SaveMethod::Put => {
                let value = wrap_root_array(&path, value);
                self.store.set_data(&path, value).await
            }
            SaveMethod::Patch => match serde_json::from_value(value) {
                Ok(patch) => self.store.patch_data(&path, &patch).await,
                Err(err) => return Err(format!("entry is not a valid json patch: {err}")),
            },
        };
        result.map_err(|err| err.to_string())
    }
}

/// The store's root document must be an object; a list-valued fetch result
/// destined for the root is wrapped under `items` rather than rejected.
fn wrap_root_array(path: &str, value: Value) -> Value {
    if path.is_empty() && value.is_array() {
        json!({ "items": value })
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_store::HttpStoreConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn wraps_root_array_under_items() {
        let wrapped = wrap_root_array("", json!([1, 2, 3]));
        assert_eq!(wrapped, json!({"items": [1, 2, 3]}));
    }

    #[test]
    fn leaves_non_root_array_untouched() {
        let value = wrap_root_array("/a/b", json!([1, 2, 3]));
        assert_eq!(value, json!([1, 2, 3]));
    }

    #[test]
    fn leaves_root_object_untouched() {
        let value = wrap_root_array("", json!({"a": 1}));
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn handle_update_fetches_and_writes_each_entry() {
        let source = MockServer::start().await;
        let policy_engine = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/countries.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"US": "United States"})))
            .mount(&source)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/data/countries"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&policy_engine)
            .await;

        let store = Arc::new(
            HttpStore::new(HttpStoreConfig {
                base_url: policy_engine.uri(),
                ..Default::default()
            })
            .unwrap(),
        );
        let fetch = FetchEngine::start(
            opal_fetch::FetchEngineConfig::default(),
            opal_fetch::ProviderRegistry::new(),
        );
        let updater = DataUpdater::new(fetch, store.clone(), false);

        let update = DataUpdate {
            id: uuid::Uuid::new_v4(),
            entries: vec![DataSourceEntry {
                url: format!("{}/countries.json", source.uri()),
                config: Value::Null,
                topics: vec![],
                dst_path: "countries".to_string(),
                save_method: SaveMethod::Put,
            }],
            reason: "test".to_string(),
            callback: None,
        };

        updater.handle_update(update).await;

        let log = store.log_state().await;
        assert_eq!(log.data_success, 1);
        assert_eq!(log.data_failure, 0);
    }

    #[tokio::test]
    async fn handle_update_records_failure_for_unreachable_source() {
        let policy_engine = MockServer::start().await;
        let store = Arc::new(
            HttpStore::new(HttpStoreConfig {
                base_url: policy_engine.uri(),
                ..Default::default()
            })
            .unwrap(),
        );
        let fetch = FetchEngine::start(
            opal_fetch::FetchEngineConfig {
                retry_policy: opal_retry::RetryPolicy::Conservative,
                ..Default::default()
            },
            opal_fetch::ProviderRegistry::new(),
        );
        let updater = DataUpdater::new(fetch, store.clone(), false);

        let update = DataUpdate {
            id: uuid::Uuid::new_v4(),
            entries: vec![DataSourceEntry {
                url: "http://127.0.0.1:1/unreachable".to_string(),
                config: Value::Null,
                topics: vec![],
                dst_path: "countries".to_string(),
                save_method: SaveMethod::Put,
            }],
            reason: "test".to_string(),
            callback: None,
        };

        updater.handle_update(update).await;

        let log = store.log_state().await;
        assert_eq!(log.data_failure, 1);
        assert_eq!(log.data_success, 0);
    }
}
