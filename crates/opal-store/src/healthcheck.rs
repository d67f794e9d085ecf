//! Healthcheck document: a structured `{ready, healthy}` JSON document
//! derived from [`TransactionLogState`] and written into the Store so
//! external observers can query it the same way they query any other data
//! document. The original templates this as Rego text; a plain JSON
//! document queried directly is the more robust shape recommended by the
//! spec's own redesign notes.

use serde_json::{Value, json};

use opal_core::TransactionLogState;

use crate::traits::Store;

pub const DEFAULT_HEALTHCHECK_PATH: &str = "system/opal/healthcheck";

pub fn render(
    log: &TransactionLogState,
    policy_updater_enabled: bool,
    data_updater_enabled: bool,
) -> Value {
    json!({
        "ready": log.ready(data_updater_enabled),
        "healthy": log.healthy(policy_updater_enabled, data_updater_enabled),
        "policy_success": log.policy_success,
        "policy_failure": log.policy_failure,
        "data_success": log.data_success,
        "data_failure": log.data_failure,
    })
}

/// Writes the rendered document to the Store. This write happens outside
/// any transaction scope and its failure is swallowed: the healthcheck
/// document is a convenience for external observers, not part of the data
/// correctness contract the Transaction Log itself protects.
pub async fn publish(
    store: &dyn Store,
    path: &str,
    log: &TransactionLogState,
    policy_updater_enabled: bool,
    data_updater_enabled: bool,
) {
    let document = render(log, policy_updater_enabled, data_updater_enabled);
    if let Err(err) = store.set_data(path, document).await {
        tracing::warn!(%err, path, "failed to publish healthcheck document");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_core::{StoreTransaction, TransactionType};

    #[test]
    fn render_reflects_log_state() {
        let mut log = TransactionLogState::default();
        let mut tx = StoreTransaction::open(TransactionType::Policy);
        tx.finish(true, None);
        log.record(tx);

        let doc = render(&log, true, false);
        assert_eq!(doc["ready"], true);
        assert_eq!(doc["healthy"], true);
        assert_eq!(doc["policy_success"], 1);
    }

    #[tokio::test]
    async fn publish_writes_to_store() {
        let store = crate::memory::InMemoryStore::new();
        let log = TransactionLogState::default();
        publish(&store, DEFAULT_HEALTHCHECK_PATH, &log, true, false).await;
        let doc = store.get_data(DEFAULT_HEALTHCHECK_PATH).await.unwrap();
        assert_eq!(doc["ready"], false);
    }
}
