//! Git policy source (spec §4.6): clones the remote once, pulls on each
//! tick, and emits the affected directory set when `HEAD` advances.
//! `git2` is blocking, so every call into it runs on a blocking thread.

use std::path::PathBuf;

use git2::{FetchOptions, RemoteCallbacks, Repository};
use opal_retry::RetryExecutor;
use serde::Deserialize;

use crate::error::{PolicyError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct GitSourceConfig {
    pub repo_url: String,
    pub clone_path: PathBuf,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub ssh_key_path: Option<PathBuf>,
}

fn default_branch() -> String {
    "main".to_string()
}

pub struct GitPolicySource {
    config: GitSourceConfig,
    retry: RetryExecutor,
}

impl GitPolicySource {
    pub fn new(config: GitSourceConfig, retry: RetryExecutor) -> Self {
        Self { config, retry }
    }

    /// Opens the local clone, cloning fresh if it doesn't exist. A clone
    /// that fails to open (corrupted) is discarded and re-cloned. Retries
    /// with the configured backoff; exhaustion is a permanent failure.
    pub async fn ensure_cloned(&self) -> Result<Repository> {
        let config = self.config.clone();
        self.retry
            .run(|_attempt| {
                let config = config.clone();
                async {
                    tokio::task::spawn_blocking(move || clone_or_open(&config))
                        .await
                        .map_err(|e| PolicyError::Git(git2::Error::from_str(&e.to_string())))?
                }
            })
            .await?;
        let path = self.config.clone_path.clone();
        tokio::task::spawn_blocking(move || Repository::open(&path))
            .await
            .map_err(|e| PolicyError::Git(git2::Error::from_str(&e.to_string())))?
            .map_err(PolicyError::from)
    }

    /// Pulls the configured branch. Returns `Some((old_sha, new_sha))` if
    /// `HEAD` advanced, `None` if already up to date.
    pub async fn pull(&self) -> Result<Option<(String, String)>> {
        let path = self.config.clone_path.clone();
        let branch = self.config.branch.clone();
        let ssh_key_path = self.config.ssh_key_path.clone();
        tokio::task::spawn_blocking(move || pull_blocking(&path, &branch, ssh_key_path.as_deref()))
            .await
            .map_err(|e| PolicyError::Git(git2::Error::from_str(&e.to_string())))?
    }

    /// Computes the directory set affected between two commits, filtered
    /// to `in_directories`, and reduced so no entry is nested under
    /// another (spec §4.6: one notification topic per top-level dir).
    pub async fn affected_directories(
        &self,
        old_sha: String,
        new_sha: String,
        in_directories: Vec<PathBuf>,
    ) -> Result<Vec<String>> {
        let path = self.config.clone_path.clone();
        tokio::task::spawn_blocking(move || {
            affected_directories_blocking(&path, &old_sha, &new_sha, &in_directories)
        })
        .await
        .map_err(|e| PolicyError::Git(git2::Error::from_str(&e.to_string())))?
    }
}

fn clone_or_open(config: &GitSourceConfig) -> Result<()> {
    if config.clone_path.join(".git").exists() {
        match Repository::open(&config.clone_path) {
            Ok(_) => return Ok(()),
            Err(_) => {
                std::fs::remove_dir_all(&config.clone_path)?;
            }
        }
    }

    let mut callbacks = RemoteCallbacks::new();
    let ssh_key_path = config.ssh_key_path.clone();
    callbacks.credentials(move |_url, username_from_url, _allowed| {
        if let Some(key_path) = &ssh_key_path {
            git2::Cred::ssh_key(username_from_url.unwrap_or("git"), None, key_path, None)
        } else {
            git2::Cred::default()
        }
    });
    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_options);
    builder.branch(&config.branch);
    builder.clone(&config.repo_url, &config.clone_path)?;
    Ok(())
}

fn pull_blocking(
    path: &std::path::Path,
    branch: &str,
    ssh_key_path: Option<&std::path::Path>,
) -> Result<Option<(String, String)>> {
    let repo = Repository::open(path)?;
    let old_head = repo.head()?.peel_to_commit()?;
    let old_sha = old_head.id().to_string();

    let mut remote = repo.find_remote("origin")?;
    let mut callbacks = RemoteCallbacks::new();
    let ssh_key_path = ssh_key_path.map(|p| p.to_path_buf());
    callbacks.credentials(move |_url, username_from_url, _allowed| {
        if let Some(key_path) = &ssh_key_path {
            git2::Cred::ssh_key(username_from_url.unwrap_or("git"), None, key_path, None)
        } else {
            git2::Cred::default()
        }
    });
    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);
    remote.fetch(&[branch], Some(&mut fetch_options), None)?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let new_commit = repo.reference_to_annotated_commit(&fetch_head)?;
    let new_sha = new_commit.id().to_string();

    if new_sha == old_sha {
        return Ok(None);
    }

    let (analysis, _) = repo.merge_analysis(&[&new_commit])?;
    if analysis.is_fast_forward() {
        let refname = format!("refs/heads/{branch}");
        let mut reference = repo.find_reference(&refname)?;
        reference.set_target(new_commit.id(), "fast-forward")?;
        repo.set_head(&refname)?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
    }

    Ok(Some((old_sha, new_sha)))
}

fn affected_directories_blocking(
    path: &std::path::Path,
    old_sha: &str,
    new_sha: &str,
    in_directories: &[PathBuf],
) -> Result<Vec<String>> {
    crate::diff::affected_directories(path, old_sha, new_sha, in_directories)
}
