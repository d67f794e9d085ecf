//! Watches the process's own config file and signals a reload. Grounded on
//! the teacher's `FileSource::watch` (debounced `notify` watcher spawned
//! onto its own task, shut down via a oneshot).

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::error::{ConfigError, Result};

pub struct ConfigWatchHandle {
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl ConfigWatchHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Watches `path`'s parent directory (debounced) and sends a unit signal on
/// `tx` whenever `path` itself changes. The caller re-runs [`crate::loader::load`]
/// on receipt; this module only detects change, it doesn't re-parse.
pub fn watch(path: impl Into<PathBuf>, debounce: Duration, tx: mpsc::Sender<()>) -> Result<ConfigWatchHandle> {
    let path = path.into();
    let watch_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path.file_name().map(|n| n.to_owned());

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let (notify_tx, notify_rx) = std::sync::mpsc::channel();

    let mut debouncer = new_debouncer(debounce, notify_tx)
        .map_err(|err| ConfigError::Watcher(err.to_string()))?;
    debouncer
        .watcher()
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .map_err(|err| ConfigError::Watcher(err.to_string()))?;

    let task = tokio::spawn(async move {
        let _debouncer = debouncer;
        info!(?path, "watching config file");
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("config watcher shutting down");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    while let Ok(events) = notify_rx.try_recv() {
                        match events {
                            Ok(events) => {
                                let changed = events
                                    .iter()
                                    .any(|event| event.path.file_name().map(|n| n.to_owned()) == file_name);
                                if changed && tx.send(()).await.is_err() {
                                    warn!("config change receiver dropped");
                                    return;
                                }
                            }
                            Err(err) => error!(%err, "config file watcher error"),
                        }
                    }
                }
            }
        }
    });

    Ok(ConfigWatchHandle {
        shutdown: shutdown_tx,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn detects_change_to_watched_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opal.toml");
        std::fs::write(&path, "bind_address = \"0.0.0.0:7002\"").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let handle = watch(&path, StdDuration::from_millis(50), tx).unwrap();

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        std::fs::write(&path, "bind_address = \"0.0.0.0:9090\"").unwrap();

        let result = timeout(StdDuration::from_secs(2), rx.recv()).await;
        assert!(matches!(result, Ok(Some(()))));

        handle.stop().await;
    }
}
