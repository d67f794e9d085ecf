//! The `Store` abstraction the rest of the pipeline programs against:
//! policy CRUD, data CRUD/patch, evaluation, and an explicit transaction
//! handle (not a dynamic proxy that tags every call with a hidden id).

use async_trait::async_trait;
use json_patch::Patch;
use serde_json::Value;

use opal_core::{StoreTransaction, TransactionType};

use crate::error::Result;

#[async_trait]
pub trait Store: Send + Sync {
    async fn set_policy(&self, id: &str, source: &str) -> Result<()>;
    async fn delete_policy(&self, id: &str) -> Result<()>;
    async fn get_policy(&self, id: &str) -> Result<Option<String>>;
    async fn list_policy_ids(&self) -> Result<Vec<String>>;

    async fn set_data(&self, path: &str, value: Value) -> Result<()>;
    async fn delete_data(&self, path: &str) -> Result<()>;
    async fn patch_data(&self, path: &str, patch: &Patch) -> Result<()>;
    async fn get_data(&self, path: &str) -> Result<Value>;

    async fn evaluate(&self, path: &str, input: Value) -> Result<Value>;

    /// Opens a transaction scope. The returned handle owns the bookkeeping
    /// for every action performed through it; the caller is responsible for
    /// calling [`Transaction::finish`] exactly once before it is dropped.
    fn transaction(&self, transaction_type: TransactionType) -> Transaction;

    /// Forwards a finished transaction record to the Transaction Log.
    async fn record_transaction(&self, tx: StoreTransaction);
}

/// An explicit, statically owned transaction scope. Every write performed
/// through a [`Store`] while one of these is live should be attributed to
/// it via [`Transaction::record_action`] and [`Transaction::record_remote`];
/// unlike the proxy-based original, nothing here uses thread-local state.
pub struct Transaction {
    inner: StoreTransaction,
}

impl Transaction {
    pub fn open(transaction_type: TransactionType) -> Self {
        Self {
            inner: StoreTransaction::open(transaction_type),
        }
    }

    pub fn record_action(&mut self, action: impl Into<String>) {
        self.inner.record_action(action);
    }

    pub fn record_remote(&mut self, remote: impl Into<String>, ok: bool) {
        self.inner.record_remote(remote, ok);
    }

    /// Finalizes the scope and returns the record for forwarding to
    /// [`Store::record_transaction`].
    pub fn finish(mut self, success: bool, error: Option<String>) -> StoreTransaction {
        self.inner.finish(success, error);
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that Store stays object-safe as an `Arc<dyn Store>`.
    fn _assert_store_object_safe(_: &dyn Store) {}
}
