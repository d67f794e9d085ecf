//! Builds a [`PolicyBundle`] from a git tree (spec §4.7): a complete bundle
//! at one commit, or a delta bundle between two commits honoring the
//! repo's `.manifest` ordering and `bundle_ignore` globs.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use git2::{Delta, DiffOptions, Repository, Tree};
use globset::GlobSet;
use opal_core::{DataModule, DeletedFiles, PolicyBundle, PolicyModule};
use regex::Regex;

use crate::error::{PolicyError, Result};

const MANIFEST_FILE: &str = ".manifest";

fn package_pattern() -> Regex {
    Regex::new(r#"^package\s+([A-Za-z0-9._"\[\]]+)\s*$"#).expect("static regex")
}

fn is_data_module(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some("data.json")
}

fn is_policy_module(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension)
}

fn extract_package_name(contents: &str) -> String {
    let pattern = package_pattern();
    contents
        .lines()
        .find_map(|line| pattern.captures(line.trim_end()))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// A path that is absolute, contains `..`, or otherwise escapes the repo
/// root is rejected wholesale (manifest ordering and tar extraction share
/// this check).
fn is_safe_relative_path(path: &str) -> bool {
    let p = Path::new(path);
    if p.is_absolute() {
        return false;
    }
    !p.components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

#[derive(Clone)]
pub struct BundleMaker {
    pub extensions: Vec<String>,
    pub in_directories: Vec<PathBuf>,
    pub policy_extension: String,
    pub bundle_ignore: Option<GlobSet>,
}

impl BundleMaker {
    pub fn new(policy_extension: impl Into<String>, in_directories: Vec<PathBuf>) -> Self {
        Self {
            extensions: Vec::new(),
            in_directories,
            policy_extension: policy_extension.into(),
            bundle_ignore: None,
        }
    }

    fn path_is_relevant(&self, path: &Path) -> bool {
        if let Some(ignore) = &self.bundle_ignore
            && ignore.is_match(path)
        {
            return false;
        }
        if !self.extensions.is_empty() && !is_data_module(path) {
            let ext = path.extension().and_then(|e| e.to_str());
            if !ext.is_some_and(|e| self.extensions.iter().any(|allowed| allowed == e)) {
                return false;
            }
        }
        if self.in_directories.is_empty() {
            return true;
        }
        self.in_directories
            .iter()
            .any(|dir| dir.as_os_str() == "." || path.starts_with(dir))
    }

    /// Builds a complete bundle of every matching file reachable from
    /// `commit`'s tree, honoring `.manifest` ordering when present.
    pub fn make_bundle(&self, repo: &Repository, commit: &git2::Commit) -> Result<PolicyBundle> {
        let tree = commit.tree()?;
        let ordered = self.ordered_paths(repo, &tree)?;

        let mut manifest = Vec::new();
        let mut policy_modules = Vec::new();
        let mut data_modules = Vec::new();

        for path in ordered {
            let Some(entry) = tree.get_path(&path).ok() else {
                continue;
            };
            if entry.kind() != Some(git2::ObjectType::Blob) {
                continue;
            }
            if !self.path_is_relevant(&path) {
                continue;
            }
            let blob = repo
                .find_blob(entry.id())
                .map_err(|_| PolicyError::UnreadableBlob(path.display().to_string()))?;
            let contents = String::from_utf8_lossy(blob.content()).to_string();

            if is_data_module(&path) {
                data_modules.push(DataModule {
                    path: path.parent().unwrap_or(Path::new("")).display().to_string(),
                    json_text: contents,
                });
            } else if is_policy_module(&path, &self.policy_extension) {
                policy_modules.push(PolicyModule {
                    path: path.display().to_string(),
                    package_name: extract_package_name(&contents),
                    source_text: contents,
                });
            } else {
                continue;
            }
            manifest.push(path.display().to_string());
        }

        Ok(PolicyBundle {
            manifest,
            hash: commit.id().to_string(),
            old_hash: None,
            policy_modules,
            data_modules,
            deleted_files: None,
        })
    }

    /// Builds a delta bundle between `old_commit` and `new_commit`: added or
    /// modified files become entries, deleted files populate
    /// `deleted_files`. Returns [`PolicyError::BaseNotFound`]-flavored
    /// behavior is the caller's responsibility (checked via `find_commit`
    /// on `old_commit`'s id before calling this).
    pub fn make_diff_bundle(
        &self,
        repo: &Repository,
        old_commit: &git2::Commit,
        new_commit: &git2::Commit,
    ) -> Result<PolicyBundle> {
        let old_tree = old_commit.tree()?;
        let new_tree = new_commit.tree()?;

        let mut opts = DiffOptions::new();
        let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut opts))?;

        let mut manifest = Vec::new();
        let mut policy_modules = Vec::new();
        let mut data_modules = Vec::new();
        let mut deleted_policy_modules = Vec::new();
        let mut deleted_data_modules = Vec::new();

        for delta in diff.deltas() {
            let status = delta.status();
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(Path::to_path_buf);
            let Some(path) = path else { continue };
            if !self.path_is_relevant(&path) {
                continue;
            }

            match status {
                Delta::Deleted => {
                    if is_data_module(&path) {
                        deleted_data_modules.push(
                            path.parent().unwrap_or(Path::new("")).display().to_string(),
                        );
                    } else if is_policy_module(&path, &self.policy_extension) {
                        deleted_policy_modules.push(path.display().to_string());
                    } else {
                        continue;
                    }
                }
                Delta::Added | Delta::Modified | Delta::Renamed | Delta::Copied => {
                    let entry = match new_tree.get_path(&path) {
                        Ok(e) => e,
                        Err(_) => continue,
                    };
                    let blob = repo
                        .find_blob(entry.id())
                        .map_err(|_| PolicyError::UnreadableBlob(path.display().to_string()))?;
                    let contents = String::from_utf8_lossy(blob.content()).to_string();

                    if is_data_module(&path) {
                        data_modules.push(DataModule {
                            path: path.parent().unwrap_or(Path::new("")).display().to_string(),
                            json_text: contents,
                        });
                    } else if is_policy_module(&path, &self.policy_extension) {
                        policy_modules.push(PolicyModule {
                            path: path.display().to_string(),
                            package_name: extract_package_name(&contents),
                            source_text: contents,
                        });
                    } else {
                        continue;
                    }
                    manifest.push(path.display().to_string());
                }
                _ => continue,
            }
        }

        let deleted_files = if deleted_policy_modules.is_empty() && deleted_data_modules.is_empty()
        {
            None
        } else {
            Some(DeletedFiles {
                policy_modules: deleted_policy_modules,
                data_modules: deleted_data_modules,
            })
        };

        Ok(PolicyBundle {
            manifest,
            hash: new_commit.id().to_string(),
            old_hash: Some(old_commit.id().to_string()),
            policy_modules,
            data_modules,
            deleted_files,
        })
    }

    /// Walks the tree depth-first, consulting `.manifest` files to order
    /// paths. Paths not referenced by any manifest are appended afterward
    /// in lexicographic order. Cycle-safe and rejects escaping paths.
    fn ordered_paths(&self, repo: &Repository, tree: &Tree) -> Result<Vec<PathBuf>> {
        let mut visited = HashSet::new();
        let mut ordered = Vec::new();
        self.walk_manifest(repo, tree, Path::new(""), &mut visited, &mut ordered)?;

        let mut remaining = Vec::new();
        collect_all_blobs(repo, tree, Path::new(""), &mut remaining)?;
        remaining.sort();
        for path in remaining {
            let key = path.display().to_string();
            if visited.insert(key) {
                ordered.push(path);
            }
        }
        Ok(ordered)
    }

    fn walk_manifest(
        &self,
        repo: &Repository,
        tree: &Tree,
        prefix: &Path,
        visited: &mut HashSet<String>,
        ordered: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let Some(manifest_entry) = tree.get_name(MANIFEST_FILE) else {
            return Ok(());
        };
        let Ok(blob) = repo.find_blob(manifest_entry.id()) else {
            return Ok(());
        };
        let contents = String::from_utf8_lossy(blob.content()).to_string();

        for line in contents.lines() {
            let entry = line.trim();
            if entry.is_empty() || !is_safe_relative_path(entry) {
                continue;
            }
            let rel_path = prefix.join(entry);
            let key = rel_path.display().to_string();
            if visited.contains(&key) {
                continue;
            }

            match tree.get_path(&rel_path) {
                Ok(found) if found.kind() == Some(git2::ObjectType::Tree) => {
                    let subtree = repo.find_tree(found.id())?;
                    visited.insert(key);
                    self.walk_manifest(repo, &subtree, &rel_path, visited, ordered)?;
                }
                Ok(found) if found.kind() == Some(git2::ObjectType::Blob) => {
                    visited.insert(key);
                    ordered.push(rel_path);
                }
                _ => continue,
            }
        }
        Ok(())
    }
}

fn collect_all_blobs(
    repo: &Repository,
    tree: &Tree,
    prefix: &Path,
    out: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in tree.iter() {
        let Some(name) = entry.name() else { continue };
        let path = prefix.join(name);
        match entry.kind() {
            Some(git2::ObjectType::Blob) => out.push(path),
            Some(git2::ObjectType::Tree) => {
                let subtree = repo.find_tree(entry.id())?;
                collect_all_blobs(repo, &subtree, &path, out)?;
            }
            _ => continue,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_package_name_matches_first_declaration() {
        let contents = "package policy.rbac\n\nallow { true }";
        assert_eq!(extract_package_name(contents), "policy.rbac");
    }

    #[test]
    fn extract_package_name_empty_when_absent() {
        assert_eq!(extract_package_name("allow { true }"), "");
    }

    #[test]
    fn is_data_module_requires_exact_filename() {
        assert!(is_data_module(Path::new("a/b/data.json")));
        assert!(!is_data_module(Path::new("a/b/other.json")));
    }

    #[test]
    fn is_safe_relative_path_rejects_escapes() {
        assert!(is_safe_relative_path("a/b"));
        assert!(!is_safe_relative_path("../a"));
        assert!(!is_safe_relative_path("/a"));
    }
}
