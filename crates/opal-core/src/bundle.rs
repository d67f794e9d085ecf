//! Policy bundle wire types, shared between the Server's Bundle Maker and
//! the Client's Policy Updater.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyModule {
    pub path: String,
    pub package_name: String,
    #[serde(rename = "rego")]
    pub source_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataModule {
    /// Containing directory of the `data.json` file this module was read
    /// from, not the file path itself.
    pub path: String,
    #[serde(rename = "data")]
    pub json_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedFiles {
    #[serde(default)]
    pub policy_modules: Vec<String>,
    #[serde(default)]
    pub data_modules: Vec<String>,
}

impl DeletedFiles {
    pub fn is_empty(&self) -> bool {
        self.policy_modules.is_empty() && self.data_modules.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBundle {
    pub manifest: Vec<String>,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_hash: Option<String>,
    #[serde(default)]
    pub policy_modules: Vec<PolicyModule>,
    #[serde(default)]
    pub data_modules: Vec<DataModule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_files: Option<DeletedFiles>,
}

impl PolicyBundle {
    pub fn is_complete(&self) -> bool {
        self.old_hash.is_none()
    }

    /// Checks the invariants from the data model: `hash != old_hash`, and
    /// every manifest entry appears in exactly one of `policy_modules`,
    /// `data_modules`, `deleted_files`.
    pub fn validate(&self) -> Result<()> {
        if let Some(old_hash) = &self.old_hash {
            if old_hash == &self.hash {
                return Err(CoreError::InvalidBundle(
                    "hash equals old_hash on a delta bundle".into(),
                ));
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut mark = |path: &str| -> Result<()> {
            if !seen.insert(path) {
                return Err(CoreError::InvalidBundle(format!(
                    "path {path} appears in more than one bundle section"
                )));
            }
            Ok(())
        };

        for module in &self.policy_modules {
            mark(&module.path)?;
        }
        for module in &self.data_modules {
            mark(&module.path)?;
        }
        if let Some(deleted) = &self.deleted_files {
            for path in &deleted.policy_modules {
                mark(path)?;
            }
            for path in &deleted.data_modules {
                mark(path)?;
            }
        }

        for path in &self.manifest {
            if !seen.contains(path.as_str()) {
                return Err(CoreError::InvalidBundle(format!(
                    "manifest entry {path} is not accounted for in any bundle section"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_bundle() -> PolicyBundle {
        PolicyBundle {
            manifest: vec!["rbac.rego".into()],
            hash: "deadbeef".into(),
            old_hash: None,
            policy_modules: vec![PolicyModule {
                path: "rbac.rego".into(),
                package_name: "app.rbac".into(),
                source_text: "package app.rbac".into(),
            }],
            data_modules: vec![],
            deleted_files: None,
        }
    }

    #[test]
    fn complete_bundle_validates() {
        complete_bundle().validate().unwrap();
    }

    #[test]
    fn rejects_equal_hashes() {
        let mut bundle = complete_bundle();
        bundle.old_hash = Some(bundle.hash.clone());
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn rejects_manifest_entry_not_covered() {
        let mut bundle = complete_bundle();
        bundle.manifest.push("ghost.rego".into());
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn rejects_path_in_two_sections() {
        let mut bundle = complete_bundle();
        bundle.deleted_files = Some(DeletedFiles {
            policy_modules: vec!["rbac.rego".into()],
            data_modules: vec![],
        });
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn wire_format_renames_source_text_to_rego() {
        let bundle = complete_bundle();
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["policy_modules"][0]["rego"], "package app.rbac");
        assert!(json["policy_modules"][0].get("source_text").is_none());
    }
}
