//! Redis-backed counter store.
//!
//! Counters are plain Redis integers under a configurable key prefix.
//! `increment_with_expiration` runs as a single Lua script so that the
//! increment and the first-time expiry are applied atomically by the server:
//! concurrent first increments of a key are serialised by Redis and only the
//! one that created the key sets its expiry.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{CounterStore, StoreError, StoreResult};

const INCREMENT_WITH_EXPIRATION: &str = r"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
if count == tonumber(ARGV[1]) and tonumber(ARGV[2]) > 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return count
";

const HEALTH_CHECK_KEY: &str = "health_check";

/// Connection settings for [`RedisStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis connection URL, e.g. `redis://127.0.0.1/`
    pub url: String,

    /// Prefix prepended to every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Per-operation timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl RedisStoreConfig {
    /// Create a configuration for `url` with default prefix and timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Per-operation timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}

fn default_timeout_ms() -> u64 {
    100
}

/// A [`CounterStore`] backed by a Redis server.
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    increment: Script,
    closed: AtomicBool,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails
    /// within the configured timeout.
    pub async fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        info!(url = %config.url, key_prefix = %config.key_prefix, "Connecting to Redis counter store");

        let client = Client::open(config.url.as_str())?;
        let timeout = config.timeout();
        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;

        Ok(Self {
            connection,
            config,
            increment: Script::new(INCREMENT_WITH_EXPIRATION),
            closed: AtomicBool::new(false),
        })
    }

    /// Get the store configuration.
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    /// Hand out a connection, unless the store has been closed.
    fn connection(&self) -> StoreResult<ConnectionManager> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(self.connection.clone())
    }

    /// Run one round trip under the configured timeout.
    async fn round_trip<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let timeout = self.config.timeout();
        tokio::time::timeout(timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<u64> {
        let key = self.config.prefixed(key);
        let mut conn = self.connection()?;

        let value: Option<String> = self.round_trip(conn.get(&key)).await?;
        match value {
            None => Ok(0),
            Some(raw) => raw
                .parse()
                .map_err(|_| StoreError::InvalidValue { key, value: raw }),
        }
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> StoreResult<()> {
        let key = self.config.prefixed(key);
        let mut conn = self.connection()?;

        if ttl.is_zero() {
            self.round_trip(conn.set::<_, _, ()>(&key, value)).await
        } else {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            self.round_trip(conn.pset_ex::<_, _, ()>(&key, value, millis))
                .await
        }
    }

    async fn increment_with_expiration(
        &self,
        key: &str,
        delta: u64,
        ttl: Duration,
    ) -> StoreResult<u64> {
        let key = self.config.prefixed(key);
        let mut conn = self.connection()?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        let mut invocation = self.increment.key(&key);
        invocation.arg(delta).arg(ttl_ms);
        self.round_trip(invocation.invoke_async(&mut conn)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let key = self.config.prefixed(key);
        let mut conn = self.connection()?;

        self.round_trip(conn.del::<_, ()>(&key)).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.set(HEALTH_CHECK_KEY, 1, Duration::from_secs(1)).await?;
        self.get(HEALTH_CHECK_KEY).await?;
        if let Err(e) = self.delete(HEALTH_CHECK_KEY).await {
            debug!(error = %e, "Failed to delete health check key");
        }
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        info!("Closing Redis counter store");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
