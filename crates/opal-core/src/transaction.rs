//! Store-transaction bookkeeping and the derived Transaction Log state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Policy,
    Data,
}

/// A bracketed set of store writes. Created when a transaction scope opens,
/// mutated by every write inside it, finalized on scope exit, then forwarded
/// to the [`TransactionLogState`]. Owned explicitly by the caller rather
/// than by a dynamic proxy around the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreTransaction {
    pub id: Uuid,
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub actions: Vec<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub remotes_status: HashMap<String, bool>,
}

impl StoreTransaction {
    pub fn open(transaction_type: TransactionType) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_type,
            actions: Vec::new(),
            success: false,
            error: None,
            creation_time: OffsetDateTime::now_utc(),
            end_time: None,
            remotes_status: HashMap::new(),
        }
    }

    pub fn record_action(&mut self, action: impl Into<String>) {
        self.actions.push(action.into());
    }

    pub fn record_remote(&mut self, remote: impl Into<String>, ok: bool) {
        self.remotes_status.insert(remote.into(), ok);
    }

    pub fn finish(&mut self, success: bool, error: Option<String>) {
        self.success = success;
        self.error = error;
        self.end_time = Some(OffsetDateTime::now_utc());
    }
}

/// Per-Client in-memory counters split by `{policy, data} x {success,
/// failure}`, serialized into the store as a healthcheck document whenever
/// it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionLogState {
    pub policy_success: u64,
    pub policy_failure: u64,
    pub data_success: u64,
    pub data_failure: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_policy_transaction: Option<StoreTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_data_transaction: Option<StoreTransaction>,
}

impl TransactionLogState {
    pub fn record(&mut self, tx: StoreTransaction) {
        match tx.transaction_type {
            TransactionType::Policy => {
                if tx.success {
                    self.policy_success += 1;
                } else {
                    self.policy_failure += 1;
                }
                self.last_policy_transaction = Some(tx);
            }
            TransactionType::Data => {
                if tx.success {
                    self.data_success += 1;
                } else {
                    self.data_failure += 1;
                }
                self.last_data_transaction = Some(tx);
            }
        }
    }

    /// At least one successful policy transaction, and (data updater
    /// disabled or at least one successful data transaction). Monotonic:
    /// once true, stays true.
    pub fn ready(&self, data_updater_enabled: bool) -> bool {
        self.policy_success > 0 && (!data_updater_enabled || self.data_success > 0)
    }

    /// Tracks most-recent outcomes and may flip either way.
    pub fn healthy(&self, policy_updater_enabled: bool, data_updater_enabled: bool) -> bool {
        let policy_ok = !policy_updater_enabled
            || self
                .last_policy_transaction
                .as_ref()
                .is_some_and(|t| t.success);
        let data_ok = !data_updater_enabled
            || self
                .last_data_transaction
                .as_ref()
                .is_some_and(|t| t.success);
        policy_ok && data_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(transaction_type: TransactionType, success: bool) -> StoreTransaction {
        let mut tx = StoreTransaction::open(transaction_type);
        tx.finish(success, if success { None } else { Some("boom".into()) });
        tx
    }

    #[test]
    fn ready_requires_policy_success() {
        let mut log = TransactionLogState::default();
        assert!(!log.ready(false));
        log.record(tx(TransactionType::Policy, true));
        assert!(log.ready(false));
    }

    #[test]
    fn ready_also_requires_data_success_when_data_updater_enabled() {
        let mut log = TransactionLogState::default();
        log.record(tx(TransactionType::Policy, true));
        assert!(!log.ready(true));
        log.record(tx(TransactionType::Data, true));
        assert!(log.ready(true));
    }

    #[test]
    fn ready_is_monotonic() {
        let mut log = TransactionLogState::default();
        log.record(tx(TransactionType::Policy, true));
        assert!(log.ready(false));
        log.record(tx(TransactionType::Policy, false));
        assert!(log.ready(false));
    }

    #[test]
    fn healthy_tracks_most_recent_outcome() {
        let mut log = TransactionLogState::default();
        log.record(tx(TransactionType::Policy, true));
        assert!(log.healthy(true, false));
        log.record(tx(TransactionType::Policy, false));
        assert!(!log.healthy(true, false));
    }

    #[test]
    fn healthy_ignores_disabled_updaters() {
        let log = TransactionLogState::default();
        assert!(log.healthy(false, false));
    }
}
