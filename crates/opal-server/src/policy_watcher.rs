//! Leader-Lock-gated Policy Source watcher (spec §4.5, §4.6): exactly one
//! worker polls (or is webhook-triggered into re-checking) the configured
//! upstream and publishes `{old_hash, new_hash, topics}` when it advances.
//! Other workers just serve API traffic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use opal_core::Topic;
use opal_policy::{
    BundleUrlSource, GitPolicySource, LeaderLock, LeaderLockConfig, PolicyError, WEBHOOK_TOPIC,
};
use opal_pubsub::Broadcaster;
use serde_json::json;

use crate::state::PolicyRepoState;

pub enum PolicySourceRuntime {
    Git {
        source: GitPolicySource,
        in_directories: Vec<PathBuf>,
    },
    BundleUrl {
        source: BundleUrlSource,
        working_dir: PathBuf,
        in_directories: Vec<PathBuf>,
    },
}

pub struct PolicyWatcherConfig {
    pub polling_interval: Duration,
    pub leader_lock: Option<LeaderLockConfig>,
}

/// Runs forever, contending for leadership whenever `leader_lock` is
/// configured. Returns only when the source hits a permanent failure
/// (spec §7: "transitions to a terminal state and requests shutdown").
pub async fn run(
    mut runtime: PolicySourceRuntime,
    config: PolicyWatcherConfig,
    broadcaster: Broadcaster,
    policy_repo: Arc<PolicyRepoState>,
) {
    loop {
        let lock = match &config.leader_lock {
            None => None,
            Some(lock_config) => Some(acquire_leadership(lock_config).await),
        };

        tracing::info!("policy source watcher acquired leadership");
        let outcome = run_as_leader(&mut runtime, &config, &broadcaster, &policy_repo).await;

        if let Some(lock) = lock {
            if let Err(error) = lock.release().await {
                tracing::warn!(%error, "failed to release leader lock");
            }
        }

        match outcome {
            Ok(()) => unreachable!("run_as_leader only returns on error"),
            Err(error) => {
                tracing::error!(%error, "policy source watcher failed permanently, requesting shutdown");
                break;
            }
        }
    }
}

async fn acquire_leadership(lock_config: &LeaderLockConfig) -> LeaderLock {
    loop {
        match LeaderLock::try_acquire(lock_config.clone()).await {
            Ok(Some(lock)) => return lock,
            Ok(None) => tokio::time::sleep(Duration::from_secs(2)).await,
            Err(error) => {
                tracing::warn!(%error, "leader lock acquisition failed, retrying");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

async fn run_as_leader(
    runtime: &mut PolicySourceRuntime,
    config: &PolicyWatcherConfig,
    broadcaster: &Broadcaster,
    policy_repo: &Arc<PolicyRepoState>,
) -> Result<(), PolicyError> {
    match runtime {
        PolicySourceRuntime::Git { source, .. } => {
            source.ensure_cloned().await?;
        }
        PolicySourceRuntime::BundleUrl { source, .. } => {
            let _ = source.check_for_changes().await?;
        }
    }
    policy_repo.mark_ready();

    let (webhook_tx, mut webhook_rx) = tokio::sync::mpsc::channel(16);
    if let Err(error) =
        broadcaster
            .notifier()
            .subscribe("policy-watcher", None, &[WEBHOOK_TOPIC.to_string()], webhook_tx)
    {
        tracing::warn!(%error, "policy watcher could not subscribe to webhook topic");
    }

    let mut ticker = tokio::time::interval(config.polling_interval);
    ticker.tick().await; // first tick fires immediately; already handled above

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            received = webhook_rx.recv() => {
                if received.is_none() {
                    // Subscription channel closed (e.g. the subscribe call
                    // above failed) — avoid busy-looping on a permanently
                    // ready closed channel; fall back to polling alone.
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            }
        }

        if let Err(error) = tick(runtime, broadcaster).await {
            tracing::warn!(%error, "policy source tick failed, will retry on next interval");
        }
    }
}

async fn tick(runtime: &mut PolicySourceRuntime, broadcaster: &Broadcaster) -> Result<(), PolicyError> {
    match runtime {
        PolicySourceRuntime::Git {
            source,
            in_directories,
        } => {
            if let Some((old_sha, new_sha)) = source.pull().await? {
                let dirs = source
                    .affected_directories(old_sha.clone(), new_sha.clone(), in_directories.clone())
                    .await?;
                publish_revision(broadcaster, &old_sha, &new_sha, dirs).await;
            }
        }
        PolicySourceRuntime::BundleUrl {
            source,
            working_dir,
            in_directories,
        } => {
            if let Some((Some(old_sha), new_sha)) = source.check_for_changes().await? {
                let dirs =
                    opal_policy::affected_directories(working_dir, &old_sha, &new_sha, in_directories)?;
                publish_revision(broadcaster, &old_sha, &new_sha, dirs).await;
            }
        }
    }
    Ok(())
}

async fn publish_revision(broadcaster: &Broadcaster, old_hash: &str, new_hash: &str, dirs: Vec<String>) {
    if dirs.is_empty() {
        return;
    }
    let topics: Vec<String> = dirs.iter().map(|dir| format!("policy:{dir}")).collect();
    let data = json!({
        "old_hash": old_hash,
        "new_hash": new_hash,
        "topics": topics,
    });
    let mut expanded: Vec<String> = topics
        .iter()
        .flat_map(|t| Topic::new(t).expand())
        .map(|t| t.as_str().to_string())
        .collect();
    expanded.sort();
    expanded.dedup();
    broadcaster.publish(&expanded, data).await;
}
