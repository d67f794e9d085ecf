//! Bundle-URL policy source (spec §4.6): periodically fetches a
//! `bundle.tar.gz`, using conditional `ETag` requests (or a body hash when
//! the server doesn't send one) to detect change, then extracts it into a
//! local git working tree and commits.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use reqwest::Client;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use sha2::{Digest, Sha256};
use serde::Deserialize;
use tar::Archive;

use crate::error::{PolicyError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct BundleSourceConfig {
    pub bundle_url: String,
    pub working_dir: PathBuf,
}

pub struct BundleUrlSource {
    client: Client,
    config: BundleSourceConfig,
    last_etag: Option<String>,
    last_hash: Option<String>,
}

impl BundleUrlSource {
    pub fn new(config: BundleSourceConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            last_etag: None,
            last_hash: None,
        }
    }

    /// Fetches the bundle if changed. `Ok(None)` covers both "not modified"
    /// (304 or identical body hash) and "not found" (404) — both are
    /// no-ops per spec. `Ok(Some((old_sha, new_sha)))` means the working
    /// directory was refreshed and a new commit was made in the local git
    /// repo; `old_sha` is `None` on the very first commit.
    pub async fn check_for_changes(&mut self) -> Result<Option<(Option<String>, String)>> {
        let mut request = self.client.get(&self.config.bundle_url);
        if let Some(etag) = &self.last_etag {
            request = request.header(IF_NONE_MATCH, etag.clone());
        }
        let response = request.send().await?;

        match response.status() {
            reqwest::StatusCode::NOT_MODIFIED => return Ok(None),
            reqwest::StatusCode::NOT_FOUND => return Ok(None),
            status if status.is_success() => {}
            status => {
                return Err(PolicyError::Io(std::io::Error::other(format!(
                    "bundle fetch returned {status}"
                ))));
            }
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        if etag.is_none() {
            let mut hasher = Sha256::new();
            hasher.update(&body);
            let hash = hex::encode(hasher.finalize());
            if self.last_hash.as_deref() == Some(hash.as_str()) {
                return Ok(None);
            }
            self.last_hash = Some(hash);
        }

        extract_tar_gz(&body, &self.config.working_dir)?;
        let identity = etag.clone().unwrap_or_else(|| {
            self.last_hash.clone().unwrap_or_default()
        });
        self.last_etag = etag;
        let shas = commit_working_dir(&self.config.working_dir, &identity)?;
        Ok(Some(shas))
    }
}

/// Extracts `data` (gzip-compressed tar) into `target`, rejecting any
/// entry whose normalized path escapes `target` or is named `.git`.
fn extract_tar_gz(data: &[u8], target: &Path) -> Result<()> {
    std::fs::create_dir_all(target)?;
    let decoder = GzDecoder::new(data);
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();

        if path.components().any(|c| c.as_os_str() == ".git") {
            return Err(PolicyError::PathEscape(path.display().to_string()));
        }
        if !is_safe_entry_path(&path) {
            return Err(PolicyError::PathEscape(path.display().to_string()));
        }

        let dest = target.join(&path);
        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            std::fs::write(&dest, contents)?;
        }
    }
    Ok(())
}

fn is_safe_entry_path(path: &Path) -> bool {
    if path.is_absolute() {
        return false;
    }
    !path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

/// Commits the extracted working directory into a local git repo (created
/// on first use), so the rest of the pipeline can keep treating this
/// source the same way it treats the Git source: as a sequence of commits.
/// Returns `(old_sha, new_sha)`, with `old_sha` absent on the first commit.
fn commit_working_dir(working_dir: &Path, identity: &str) -> Result<(Option<String>, String)> {
    let repo = match git2::Repository::open(working_dir) {
        Ok(repo) => repo,
        Err(_) => git2::Repository::init(working_dir)?,
    };

    let mut index = repo.index()?;
    index.add_all(["*"], git2::IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let signature = git2::Signature::now("opal-server", "opal-server@localhost")?;
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let old_sha = parent.as_ref().map(|c| c.id().to_string());
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    let new_oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        &format!("bundle update: {identity}"),
        &tree,
        &parents,
    )?;
    Ok((old_sha, new_oid.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_safe_entry_path_rejects_traversal() {
        assert!(is_safe_entry_path(Path::new("a/b.rego")));
        assert!(!is_safe_entry_path(Path::new("../escape")));
        assert!(!is_safe_entry_path(Path::new("/etc/passwd")));
    }
}
