//! In-memory reference [`Store`] implementation. Used in tests and by
//! deployments that embed a policy engine in-process instead of talking to
//! one over HTTP.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use json_patch::Patch;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use opal_core::{StoreTransaction, TransactionLogState, TransactionType};

use crate::cache::DataCache;
use crate::error::Result;
use crate::traits::{Store, Transaction};

pub struct InMemoryStore {
    policies: RwLock<HashMap<String, String>>,
    data: DataCache,
    log: AsyncMutex<TransactionLogState>,
    lock: AsyncMutex<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            data: DataCache::new(),
            log: AsyncMutex::new(TransactionLogState::default()),
            lock: AsyncMutex::new(()),
        }
    }

    pub async fn log_state(&self) -> TransactionLogState {
        self.log.lock().await.clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn set_policy(&self, id: &str, source: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.policies
            .write()
            .unwrap()
            .insert(id.to_string(), source.to_string());
        Ok(())
    }

    async fn delete_policy(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.policies.write().unwrap().remove(id);
        Ok(())
    }

    async fn get_policy(&self, id: &str) -> Result<Option<String>> {
        Ok(self.policies.read().unwrap().get(id).cloned())
    }

    async fn list_policy_ids(&self) -> Result<Vec<String>> {
        Ok(self.policies.read().unwrap().keys().cloned().collect())
    }

    async fn set_data(&self, path: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.data.set(path, value);
        Ok(())
    }

    async fn delete_data(&self, path: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.data.delete(path);
        Ok(())
    }

    async fn patch_data(&self, path: &str, patch: &Patch) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut current = self.data.get(path);
        json_patch::patch(&mut current, patch)?;
        self.data.set(path, current);
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<Value> {
        Ok(self.data.get(path))
    }

    async fn evaluate(&self, path: &str, input: Value) -> Result<Value> {
        // The in-memory store has no rule engine; it returns the raw data
        // document at `path`, which is sufficient for tests that only
        // exercise the write path. `input` is accepted for trait parity.
        let _ = input;
        Ok(self.data.get(path))
    }

    fn transaction(&self, transaction_type: TransactionType) -> Transaction {
        Transaction::open(transaction_type)
    }

    async fn record_transaction(&self, tx: StoreTransaction) {
        self.log.lock().await.record(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_and_get_policy_round_trips() {
        let store = InMemoryStore::new();
        store.set_policy("rbac", "package app.rbac").await.unwrap();
        assert_eq!(
            store.get_policy("rbac").await.unwrap(),
            Some("package app.rbac".to_string())
        );
        assert_eq!(store.list_policy_ids().await.unwrap(), vec!["rbac"]);
    }

    #[tokio::test]
    async fn delete_policy_removes_it() {
        let store = InMemoryStore::new();
        store.set_policy("rbac", "package app.rbac").await.unwrap();
        store.delete_policy("rbac").await.unwrap();
        assert_eq!(store.get_policy("rbac").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_and_get_data_round_trips() {
        let store = InMemoryStore::new();
        store.set_data("a/b", json!({"x": 1})).await.unwrap();
        assert_eq!(store.get_data("a/b").await.unwrap(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn patch_data_applies_json_patch() {
        let store = InMemoryStore::new();
        store.set_data("a", json!({"x": 1})).await.unwrap();
        let patch: Patch =
            serde_json::from_value(json!([{"op": "add", "path": "/y", "value": 2}])).unwrap();
        store.patch_data("a", &patch).await.unwrap();
        assert_eq!(store.get_data("a").await.unwrap(), json!({"x": 1, "y": 2}));
    }

    #[tokio::test]
    async fn record_transaction_updates_log() {
        let store = InMemoryStore::new();
        let mut tx = StoreTransaction::open(TransactionType::Policy);
        tx.finish(true, None);
        store.record_transaction(tx).await;
        assert!(store.log_state().await.ready(false));
    }
}
