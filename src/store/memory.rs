//! In-process counter store used as a test double.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CounterStore, StoreError, StoreResult};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// A [`CounterStore`] kept in a mutex-guarded map.
///
/// Every operation takes the map lock, so increments are atomic. Tests can
/// make the store fail on demand with [`MemoryStore::set_failing`] and wipe
/// it with [`MemoryStore::clear`].
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store whose expiry is driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            failing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Make every subsequent operation fail (or stop failing).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Remove every counter.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of live counters.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    /// Whether the store holds no live counters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("memory store set to fail".to_string()));
        }
        Ok(())
    }

    fn expiry(&self, now: Instant, ttl: Duration) -> Option<Instant> {
        (!ttl.is_zero()).then(|| now + ttl)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<u64> {
        self.check_available()?;
        let now = self.clock.now();
        let entries = self.entries.lock();

        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map_or(0, |e| e.value))
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> StoreResult<()> {
        self.check_available()?;
        let now = self.clock.now();
        let expires_at = self.expiry(now, ttl);

        self.entries
            .lock()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn increment_with_expiration(
        &self,
        key: &str,
        delta: u64,
        ttl: Duration,
    ) -> StoreResult<u64> {
        self.check_available()?;
        let now = self.clock.now();
        let expires_at = self.expiry(now, ttl);
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.value = entry.value.saturating_add(delta);
                Ok(entry.value)
            }
            _ => {
                // New keys are the only growth path; drop expired ones first.
                entries.retain(|_, e| e.is_live(now));
                entries.insert(key.to_string(), Entry { value: delta, expires_at });
                Ok(delta)
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_available()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.check_available()
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_get_missing_key_is_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_initialises_then_adds() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(2);

        assert_eq!(store.increment_with_expiration("k", 3, ttl).await.unwrap(), 3);
        assert_eq!(store.increment_with_expiration("k", 2, ttl).await.unwrap(), 5);
        assert_eq!(store.get("k").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_counter_expires_and_reinitialises() {
        let clock = ManualClock::new();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let ttl = Duration::from_secs(2);

        store.increment_with_expiration("k", 1, ttl).await.unwrap();
        store.increment_with_expiration("k", 1, ttl).await.unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.get("k").await.unwrap(), 0);
        assert_eq!(store.increment_with_expiration("k", 1, ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_does_not_extend_ttl() {
        let clock = ManualClock::new();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let ttl = Duration::from_secs(2);

        store.increment_with_expiration("k", 1, ttl).await.unwrap();
        clock.advance(Duration::from_millis(1500));
        store.increment_with_expiration("k", 1, ttl).await.unwrap();
        clock.advance(Duration::from_millis(500));

        assert_eq!(store.get("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_counters_are_evicted() {
        let clock = ManualClock::new();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let ttl = Duration::from_secs(2);

        for i in 0..100 {
            let key = format!("global:user-{}:", i);
            store.increment_with_expiration(&key, 1, ttl).await.unwrap();
        }
        assert_eq!(store.entries.lock().len(), 100);

        clock.advance(ttl);
        store.increment_with_expiration("global:late:", 1, ttl).await.unwrap();

        assert_eq!(store.entries.lock().len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_set_and_delete() {
        let store = MemoryStore::new();

        store.set("k", 42, Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), 42);

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failing_store_errors() {
        let store = MemoryStore::new();
        store.set_failing(true);

        assert!(matches!(store.get("k").await, Err(StoreError::Injected(_))));
        assert!(store.health_check().await.is_err());

        store.set_failing(false);
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_store_errors() {
        let store = MemoryStore::new();
        store.close().await.unwrap();

        assert!(matches!(
            store.increment_with_expiration("k", 1, Duration::from_secs(1)).await,
            Err(StoreError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new();
        store.set("a", 1, Duration::ZERO).await.unwrap();
        store.set("b", 1, Duration::ZERO).await.unwrap();
        assert_eq!(store.len(), 2);

        store.clear();
        assert!(store.is_empty());
    }
}
