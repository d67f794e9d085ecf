//! Cross-worker mutual exclusion (spec §4.5). Used only by the Server: of
//! all worker processes behind a load balancer, exactly one should run the
//! Policy Source watcher and subscribe to the internal `webhook` topic.
//!
//! Implemented as a Redis `SET NX PX` lease, renewed periodically by the
//! holder. On holder death the lease expires and the next poller acquires
//! it; there is no fairness guarantee, matching the spec's contract.

use std::time::Duration;

use deadpool_redis::{Config, Runtime};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderLockConfig {
    pub redis_url: String,
    #[serde(default = "default_resource")]
    pub resource: String,
    #[serde(default = "default_lease", with = "humantime_serde")]
    pub lease: Duration,
    #[serde(default = "default_renew_interval", with = "humantime_serde")]
    pub renew_interval: Duration,
}

fn default_resource() -> String {
    "opal:leader".to_string()
}

fn default_lease() -> Duration {
    Duration::from_secs(10)
}

fn default_renew_interval() -> Duration {
    Duration::from_secs(3)
}

impl Default for LeaderLockConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            resource: "opal:leader".to_string(),
            lease: Duration::from_secs(10),
            renew_interval: Duration::from_secs(3),
        }
    }
}

/// A handle that holds the lock while alive. Dropping it does not release
/// the lease early (the renewal task simply stops and the lease expires);
/// callers that need prompt release should call [`LeaderLock::release`].
pub struct LeaderLock {
    pool: deadpool_redis::Pool,
    config: LeaderLockConfig,
    token: String,
    stop: tokio::sync::watch::Sender<bool>,
}

impl LeaderLock {
    /// Attempts to acquire the lock once. Returns `Ok(None)` if another
    /// worker currently holds it.
    pub async fn try_acquire(config: LeaderLockConfig) -> Result<Option<Self>> {
        let pool = Config::from_url(&config.redis_url).create_pool(Some(Runtime::Tokio1))?;
        let token = Uuid::new_v4().to_string();
        let mut conn = pool.get().await?;

        let acquired: bool = redis::cmd("SET")
            .arg(&config.resource)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(config.lease.as_millis() as u64)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();

        if !acquired {
            return Ok(None);
        }

        let (stop, mut stop_rx) = tokio::sync::watch::channel(false);
        let renew_pool = pool.clone();
        let renew_config = config.clone();
        let renew_token = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(renew_config.renew_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = renew(&renew_pool, &renew_config, &renew_token).await {
                            tracing::warn!(%error, "leader lock renewal failed");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        Ok(Some(Self {
            pool,
            config,
            token,
            stop,
        }))
    }

    /// Releases the lease immediately, provided this handle still holds it
    /// (checked via the held token, so a stale handle cannot release a
    /// lease another worker has since acquired).
    pub async fn release(self) -> Result<()> {
        let _ = self.stop.send(true);
        let mut conn = self.pool.get().await?;
        let script = redis::Script::new(
            r"if redis.call('get', KEYS[1]) == ARGV[1] then
                return redis.call('del', KEYS[1])
              else
                return 0
              end",
        );
        let _: i64 = script
            .key(&self.config.resource)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

async fn renew(pool: &deadpool_redis::Pool, config: &LeaderLockConfig, token: &str) -> Result<()> {
    let mut conn = pool.get().await?;
    let script = redis::Script::new(
        r"if redis.call('get', KEYS[1]) == ARGV[1] then
            return redis.call('pexpire', KEYS[1], ARGV[2])
          else
            return 0
          end",
    );
    let _: i64 = script
        .key(&config.resource)
        .arg(token)
        .arg(config.lease.as_millis() as u64)
        .invoke_async(&mut conn)
        .await?;
    Ok(())
}
