//! Transient fetch-task identity, shared between the Data Fetch Engine and
//! its callers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Created when a fetch task is enqueued, dropped once the task completes.
/// Carries enough identity for logging and for `on_failure` hooks to name
/// the offending task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchEvent {
    pub id: Uuid,
    pub fetcher_name: String,
    pub url: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl FetchEvent {
    pub fn new(
        fetcher_name: impl Into<String>,
        url: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            fetcher_name: fetcher_name.into(),
            url: url.into(),
            config,
        }
    }
}
