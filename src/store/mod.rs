//! Shared counter store contract.
//!
//! The distributed tiers only ever talk to a [`CounterStore`]. The networked
//! [`RedisStore`] and the in-process [`MemoryStore`] are interchangeable;
//! limiter code never inspects which one it was given.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis_store::{RedisStore, RedisStoreConfig};

/// Errors returned by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Redis backend reported a failure
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The backend did not answer in time
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The client has been closed
    #[error("store client is closed")]
    Closed,

    /// A stored value could not be read as a counter
    #[error("invalid counter value for key {key:?}: {value:?}")]
    InvalidValue { key: String, value: String },

    /// A failure injected by a test double
    #[error("injected failure: {0}")]
    Injected(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// An abstract key-value store holding expiring counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a counter. A missing or expired key reads as `0`, not an error.
    async fn get(&self, key: &str) -> StoreResult<u64>;

    /// Overwrite a counter with the given time to live.
    async fn set(&self, key: &str, value: u64, ttl: Duration) -> StoreResult<()>;

    /// Atomically add `delta` to a counter and return the new value.
    ///
    /// A missing key is initialised to `delta` with the given time to live.
    /// Concurrent first increments of the same key must not both initialise.
    async fn increment_with_expiration(
        &self,
        key: &str,
        delta: u64,
        ttl: Duration,
    ) -> StoreResult<u64>;

    /// Remove a counter.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Check that the store is reachable.
    async fn health_check(&self) -> StoreResult<()>;

    /// Release the client. Later calls fail with [`StoreError::Closed`].
    async fn close(&self) -> StoreResult<()>;
}
