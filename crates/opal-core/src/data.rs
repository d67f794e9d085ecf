//! Data-update wire types shared between the Server's `/data/update` route
//! and the Client's Data Updater / Data Fetch Engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SaveMethod {
    Put,
    Patch,
}

impl Default for SaveMethod {
    fn default() -> Self {
        SaveMethod::Put
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceEntry {
    pub url: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub topics: Vec<String>,
    pub dst_path: String,
    #[serde(default)]
    pub save_method: SaveMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataUpdate {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub entries: Vec<DataSourceEntry>,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

/// Per-entry outcome of fetching and writing one [`DataSourceEntry`],
/// threaded back to a configured callback when `report_on_data_updates` is
/// enabled. Not part of the base spec's `StoreTransaction`, which tracks
/// outcomes for the Transaction Log rather than for the original caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEntryReport {
    pub dst_path: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataUpdateReport {
    pub update_id: Uuid,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    pub entries: Vec<DataEntryReport>,
}

impl DataUpdateReport {
    pub fn new(update: &DataUpdate) -> Self {
        Self {
            update_id: update.id,
            reason: update.reason.clone(),
            callback: update.callback.clone(),
            entries: Vec::with_capacity(update.entries.len()),
        }
    }
}

/// Response body for `POST /data/config`: the bootstrap set of data
/// sources a freshly-connected client should fetch before relying on
/// incremental `/data/update` notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDataSourceConfig {
    pub entries: Vec<DataSourceEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_method_defaults_to_put() {
        let json = serde_json::json!({"url": "http://x", "dst_path": "/x"});
        let entry: DataSourceEntry = serde_json::from_value(json).unwrap();
        assert_eq!(entry.save_method, SaveMethod::Put);
    }

    #[test]
    fn save_method_roundtrips_uppercase() {
        let json = serde_json::to_value(SaveMethod::Patch).unwrap();
        assert_eq!(json, "PATCH");
    }
}
