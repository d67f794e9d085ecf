//! Policy Updater (spec §4.10): on a policy-topic notification, fetches the
//! affected directory's bundle (delta when a known hash exists, complete
//! otherwise) and applies it to the Store under a policy transaction, honoring
//! manifest order and retrying failed writes to the end of the operation list.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;

use opal_core::{PolicyBundle, TransactionType};
use opal_store::{HttpStore, Store};
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use crate::error::{ClientError, Result};

enum WriteOp {
    SetPolicy { id: String, source: String },
    DeletePolicy { id: String },
    SetData { path: String, value: Value },
    DeleteData { path: String },
}

impl WriteOp {
    fn describe(&self) -> String {
        match self {
            WriteOp::SetPolicy { id, .. } => format!("set_policy {id}"),
            WriteOp::DeletePolicy { id } => format!("delete_policy {id}"),
            WriteOp::SetData { path, .. } => format!("set_data {path}"),
            WriteOp::DeleteData { path } => format!("delete_data {path}"),
        }
    }
}

pub struct PolicyUpdater {
    client: reqwest::Client,
    server_url: String,
    token: Option<String>,
    store: Arc<HttpStore>,
    known_hashes: Mutex<HashMap<String, String>>,
}

impl PolicyUpdater {
    pub fn new(server_url: String, token: Option<String>, store: Arc<HttpStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url,
            token,
            store,
            known_hashes: Mutex::new(HashMap::new()),
        }
    }

    /// Handles an inbound notification on a subscribed `policy:<dir>` topic.
    /// `dir` has already had its scope prefix stripped by the transport.
    pub async fn handle_notification(&self, dir: &str, data: &Value) {
        if data.get("new_hash").and_then(Value::as_str).is_none() {
            return;
        }
        self.sync_directory(dir, false).await;
    }

    /// Full resync, run on every (re)connect (spec §4.10).
    pub async fn full_resync(&self, directories: &[String]) {
        for dir in directories {
            self.sync_directory(dir, true).await;
        }
    }

    async fn sync_directory(&self, dir: &str, force_complete: bool) {
        let base_hash = if force_complete {
            None
        } else {
            self.known_hashes.lock().unwrap().get(dir).cloned()
        };

        let bundle = match self.fetch_bundle(dir, base_hash.as_deref()).await {
            Ok(bundle) => bundle,
            Err(ClientError::BaseNotFound) => match self.fetch_bundle(dir, None).await {
                Ok(bundle) => bundle,
                Err(err) => {
                    tracing::warn!(%err, dir, "policy bundle fetch failed");
                    return;
                }
            },
            Err(err) => {
                tracing::warn!(%err, dir, "policy bundle fetch failed");
                return;
            }
        };

        self.apply_bundle(dir, bundle).await;
    }

    async fn fetch_bundle(&self, dir: &str, base_hash: Option<&str>) -> Result<PolicyBundle> {
        let mut url = Url::parse(&format!("{}/policy", self.server_url))?;
        url.query_pairs_mut().append_pair("path", dir);
        if let Some(hash) = base_hash {
            url.query_pairs_mut().append_pair("base_hash", hash);
        }

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if response.status() == StatusCode::NOT_FOUND && base_hash.is_some() {
            return Err(ClientError::BaseNotFound);
        }
        let response = response.error_for_status()?;
        Ok(response.json::<PolicyBundle>().await?)
    }

    async fn apply_bundle(&self, dir: &str, bundle: PolicyBundle) {
        let mut tx = self.store.transaction(TransactionType::Policy);
        match self.write_bundle(&bundle).await {
            Ok(ops_applied) => {
                for action in ops_applied {
                    tx.record_action(action);
                }
                let record = tx.finish(true, None);
                self.store.record_transaction(record).await;
                self.known_hashes
                    .lock()
                    .unwrap()
                    .insert(dir.to_string(), bundle.hash.clone());
                tracing::info!(dir, hash = %bundle.hash, "policy bundle applied");
            }
            Err(err) => {
                let record = tx.finish(false, Some(err.to_string()));
                self.store.record_transaction(record).await;
                tracing::warn!(%err, dir, "policy bundle apply failed");
            }
        }
    }

    /// Builds the operation list for `bundle` and runs it through the
    /// postponed-failure retry loop. Returns the ordered list of actions that
    /// succeeded, for the transaction's action log.
    async fn write_bundle(&self, bundle: &PolicyBundle) -> Result<Vec<String>> {
        let mut queue = self.build_ops(bundle).await?;
        let mut applied = Vec::new();

        while !queue.is_empty() {
            let pass_len = queue.len();
            let mut progressed = false;
            let mut last_errors = Vec::new();

            for _ in 0..pass_len {
                let op = queue.pop_front().expect("pass_len bounds the loop");
                match self.apply_op(&op).await {
                    Ok(()) => {
                        applied.push(op.describe());
                        progressed = true;
                    }
                    Err(err) => {
                        last_errors.push(format!("{}: {err}", op.describe()));
                        queue.push_back(op);
                    }
                }
            }

            if !progressed {
                return Err(ClientError::WritesExhausted(last_errors));
            }
        }

        Ok(applied)
    }

    /// Complete bundles additionally delete policy modules present in the
    /// store but absent from the new manifest. Stale data documents are not
    /// diffed the same way: the Store has no "list all data paths" operation
    /// to compare against (matching the policy engine's own HTTP API, which
    /// has no such endpoint either).
    async fn build_ops(&self, bundle: &PolicyBundle) -> Result<VecDeque<WriteOp>> {
        let mut ops = VecDeque::new();

        for path in &bundle.manifest {
            if let Some(module) = bundle.policy_modules.iter().find(|m| &m.path == path) {
                ops.push_back(WriteOp::SetPolicy {
                    id: module.path.clone(),
                    source: module.source_text.clone(),
                });
            } else if let Some(module) = bundle.data_modules.iter().find(|m| &m.path == path) {
                let value: Value = serde_json::from_str(&module.json_text)?;
                ops.push_back(WriteOp::SetData {
                    path: normalize_data_path(&module.path),
                    value,
                });
            }
        }

        if let Some(deleted) = &bundle.deleted_files {
            for id in &deleted.policy_modules {
                ops.push_back(WriteOp::DeletePolicy { id: id.clone() });
            }
            for path in &deleted.data_modules {
                ops.push_back(WriteOp::DeleteData {
                    path: normalize_data_path(path),
                });
            }
        }

        if bundle.is_complete() {
            let ids_in_store: std::collections::HashSet<String> =
                self.store.list_policy_ids().await?.into_iter().collect();
            let ids_in_bundle: std::collections::HashSet<String> = bundle
                .policy_modules
                .iter()
                .map(|m| m.path.clone())
                .collect();
            for stale in ids_in_store.difference(&ids_in_bundle) {
                ops.push_back(WriteOp::DeletePolicy { id: stale.clone() });
            }
        }

        Ok(ops)
    }

    async fn apply_op(&self, op: &WriteOp) -> opal_store::error::Result<()> {
        match op {
            WriteOp::SetPolicy { id, source } => self.store.set_policy(id, source).await,
            WriteOp::DeletePolicy { id } => self.store.delete_policy(id).await,
            WriteOp::SetData { path, value } => self.store.set_data(path, value.clone()).await,
            WriteOp::DeleteData { path } => self.store.delete_data(path).await,
        }
    }
}

/// Empty or `.` is the store root; otherwise the path must begin with `/`
/// (spec §4.11's path-normalization rule, shared with the Data Updater).
pub fn normalize_data_path(path: &str) -> String {
    if path.is_empty() || path == "." {
        return String::new();
    }
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_core::PolicyModule;
    use opal_store::HttpStoreConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn normalize_data_path_roots_empty_and_dot() {
        assert_eq!(normalize_data_path(""), "");
        assert_eq!(normalize_data_path("."), "");
    }

    #[test]
    fn normalize_data_path_prefixes_slash() {
        assert_eq!(normalize_data_path("a/b"), "/a/b");
        assert_eq!(normalize_data_path("/a/b"), "/a/b");
    }

    fn complete_bundle() -> PolicyBundle {
        PolicyBundle {
            manifest: vec!["rbac.rego".to_string()],
            hash: "hash-1".to_string(),
            old_hash: None,
            policy_modules: vec![PolicyModule {
                path: "rbac.rego".to_string(),
                package_name: "app.rbac".to_string(),
                source_text: "package app.rbac".to_string(),
            }],
            data_modules: vec![],
            deleted_files: None,
        }
    }

    #[tokio::test]
    async fn sync_directory_applies_complete_bundle_and_caches_hash() {
        let opal_server = MockServer::start().await;
        let policy_engine = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/policy"))
            .and(query_param("path", "rbac"))
            .respond_with(ResponseTemplate::new(200).set_body_json(complete_bundle()))
            .mount(&opal_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/policies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": []})))
            .mount(&policy_engine)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/policies/rbac.rego"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&policy_engine)
            .await;

        let store = Arc::new(
            HttpStore::new(HttpStoreConfig {
                base_url: policy_engine.uri(),
                ..Default::default()
            })
            .unwrap(),
        );
        let updater = PolicyUpdater::new(opal_server.uri(), None, store.clone());

        updater.sync_directory("rbac", false).await;

        assert_eq!(
            updater.known_hashes.lock().unwrap().get("rbac"),
            Some(&"hash-1".to_string())
        );
        let log = store.log_state().await;
        assert_eq!(log.policy_success, 1);
        assert_eq!(log.policy_failure, 0);
    }

    #[tokio::test]
    async fn sync_directory_records_failure_when_writes_exhausted() {
        let opal_server = MockServer::start().await;
        let policy_engine = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/policy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(complete_bundle()))
            .mount(&opal_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/policies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": []})))
            .mount(&policy_engine)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/policies/rbac.rego"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&policy_engine)
            .await;

        let store = Arc::new(
            HttpStore::new(HttpStoreConfig {
                base_url: policy_engine.uri(),
                retry_policy: opal_retry::RetryPolicy::Conservative,
                ..Default::default()
            })
            .unwrap(),
        );
        let updater = PolicyUpdater::new(opal_server.uri(), None, store.clone());

        updater.sync_directory("rbac", true).await;

        let log = store.log_state().await;
        assert_eq!(log.policy_failure, 1);
        assert!(updater.known_hashes.lock().unwrap().get("rbac").is_none());
    }
}
