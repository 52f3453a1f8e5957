//! Distributed rate limiter backed by a shared counter store.
//!
//! Each tier counts requests per key in a fixed window. The first increment
//! of a key creates it with a time to live of one window plus a one-second
//! buffer, and the key's expiry is what resets the count. A caller can
//! therefore see up to roughly twice the configured rate across a window
//! boundary (the tail of one window plus the head of the next).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::backend::TierLimiter;
use super::key::{RateLimitKey, Tier};
use super::policy::FailureMode;
use super::rules::TierConfig;
use crate::error::Result;
use crate::store::CounterStore;

/// Length of one counting window.
pub const WINDOW: Duration = Duration::from_secs(1);
/// Extra lifetime given to a counter beyond its window.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(1);

/// A fixed-window limiter for one tier, sharing state through a store.
pub struct ScopedDistributedLimiter {
    tier: Tier,
    config: TierConfig,
    store: Arc<dyn CounterStore>,
    failure_mode: FailureMode,
}

impl ScopedDistributedLimiter {
    /// Create a distributed limiter for `tier`.
    ///
    /// # Errors
    /// Returns a configuration error if any rate or the burst is zero.
    pub fn new(
        tier: Tier,
        config: TierConfig,
        store: Arc<dyn CounterStore>,
        failure_mode: FailureMode,
    ) -> Result<Self> {
        config.validate(tier)?;

        debug!(
            tier = %tier,
            rate = config.rate,
            overrides = config.overrides.len(),
            failure_mode = %failure_mode,
            "Creating distributed limiter"
        );

        Ok(Self {
            tier,
            config,
            store,
            failure_mode,
        })
    }

    /// Counter time to live: one window plus the buffer.
    pub fn expiration(&self) -> Duration {
        WINDOW + EXPIRY_BUFFER
    }

    /// Get the failure mode applied to store errors.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Get the tier configuration.
    pub fn config(&self) -> &TierConfig {
        &self.config
    }
}

#[async_trait]
impl TierLimiter for ScopedDistributedLimiter {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn allow(&self, identity: &str, discriminator: &str) -> bool {
        let key = RateLimitKey::new(self.tier, identity, discriminator);
        let rate = self.config.rate_for(discriminator);

        match self
            .store
            .increment_with_expiration(key.as_str(), 1, self.expiration())
            .await
        {
            Ok(count) => {
                let allowed = count <= u64::from(rate);
                trace!(tier = %self.tier, key = %key, count, rate, allowed, "Checked distributed rate limit");
                if !allowed {
                    debug!(
                        tier = %self.tier,
                        identity,
                        discriminator,
                        count,
                        limit = rate,
                        "Distributed rate limit exceeded"
                    );
                }
                allowed
            }
            Err(e) => {
                warn!(
                    scope = self.tier.scope(),
                    identity,
                    discriminator,
                    error = %e,
                    failure_mode = %self.failure_mode,
                    "Store error incrementing counter"
                );
                self.failure_mode.on_store_error()
            }
        }
    }

    async fn remaining_tokens(&self, identity: &str, discriminator: &str) -> u32 {
        let key = RateLimitKey::new(self.tier, identity, discriminator);
        let rate = self.config.rate_for(discriminator);

        match self.store.get(key.as_str()).await {
            Ok(count) => u64::from(rate).saturating_sub(count) as u32,
            Err(e) => {
                // Reads report full capacity on error, whatever the failure mode.
                warn!(
                    scope = self.tier.scope(),
                    identity,
                    discriminator,
                    error = %e,
                    "Store error reading counter"
                );
                rate
            }
        }
    }

    fn limit(&self, discriminator: &str) -> u32 {
        self.config.rate_for(discriminator)
    }

    fn retry_after(&self, _discriminator: &str) -> Duration {
        WINDOW
    }

    /// No-op: counters live in the shared store. Tests clear the store
    /// double directly.
    fn reset(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::MemoryStore;

    fn limiter(
        tier: Tier,
        config: TierConfig,
        failure_mode: FailureMode,
    ) -> (ScopedDistributedLimiter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let limiter =
            ScopedDistributedLimiter::new(tier, config, store.clone(), failure_mode).unwrap();
        (limiter, store)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let result = ScopedDistributedLimiter::new(
            Tier::Global,
            TierConfig::new(0, 1),
            store,
            FailureMode::Allow,
        );
        assert!(matches!(result, Err(Error::InvalidTier { .. })));
    }

    #[tokio::test]
    async fn test_allows_up_to_rate() {
        let (limiter, _) = limiter(Tier::Global, TierConfig::new(2, 1), FailureMode::Allow);

        assert!(limiter.allow("user123", "").await);
        assert!(limiter.allow("user123", "").await);
        assert!(!limiter.allow("user123", "").await);
    }

    #[tokio::test]
    async fn test_remaining_tokens() {
        let (limiter, _) = limiter(Tier::Global, TierConfig::new(10, 1), FailureMode::Allow);

        assert_eq!(limiter.remaining_tokens("user123", "").await, 10);
        for _ in 0..3 {
            limiter.allow("user123", "").await;
        }
        assert_eq!(limiter.remaining_tokens("user123", "").await, 7);
    }

    #[tokio::test]
    async fn test_remaining_tokens_floors_at_zero() {
        let (limiter, _) = limiter(Tier::Http, TierConfig::new(1, 1), FailureMode::Allow);

        for _ in 0..3 {
            limiter.allow("user", "").await;
        }
        assert_eq!(limiter.remaining_tokens("user", "").await, 0);
    }

    #[tokio::test]
    async fn test_counter_key_and_expiry() {
        let (limiter, store) = limiter(
            Tier::HttpEndpoint,
            TierConfig::new(5, 1),
            FailureMode::Allow,
        );

        limiter.allow("user", "GET:/a").await;

        assert_eq!(store.get("endpoint:user:GET:/a").await.unwrap(), 1);
        assert_eq!(limiter.expiration(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_override_rate() {
        let config = TierConfig::new(1, 1).with_override("/pkg.Svc/Hot", 3);
        let (limiter, _) = limiter(Tier::GrpcMethod, config, FailureMode::Allow);

        for _ in 0..3 {
            assert!(limiter.allow("user", "/pkg.Svc/Hot").await);
        }
        assert!(!limiter.allow("user", "/pkg.Svc/Hot").await);

        assert!(limiter.allow("user", "/pkg.Svc/Cold").await);
        assert!(!limiter.allow("user", "/pkg.Svc/Cold").await);
        assert_eq!(limiter.limit("/pkg.Svc/Hot"), 3);
    }

    #[tokio::test]
    async fn test_identities_and_discriminators_are_isolated() {
        let (limiter, _) = limiter(Tier::HttpEndpoint, TierConfig::new(1, 1), FailureMode::Allow);

        assert!(limiter.allow("alice", "GET:/a").await);
        assert!(limiter.allow("bob", "GET:/a").await);
        assert!(limiter.allow("alice", "POST:/a").await);
        assert!(!limiter.allow("alice", "GET:/a").await);
    }

    #[tokio::test]
    async fn test_fail_open() {
        let (limiter, store) = limiter(Tier::Global, TierConfig::new(1, 1), FailureMode::Allow);
        store.set_failing(true);

        for identity in ["a", "b", "c"] {
            for _ in 0..5 {
                assert!(limiter.allow(identity, "").await);
            }
        }
    }

    #[tokio::test]
    async fn test_fail_closed() {
        let (limiter, store) = limiter(Tier::Global, TierConfig::new(100, 1), FailureMode::Deny);
        store.set_failing(true);

        for identity in ["a", "b", "c"] {
            assert!(!limiter.allow(identity, "").await);
        }
    }

    #[tokio::test]
    async fn test_fail_closed_still_reports_full_capacity() {
        let (limiter, store) = limiter(Tier::Global, TierConfig::new(10, 1), FailureMode::Deny);
        store.set_failing(true);

        assert!(!limiter.allow("user", "").await);
        assert_eq!(limiter.remaining_tokens("user", "").await, 10);
    }

    #[tokio::test]
    async fn test_reset_is_noop() {
        let (limiter, store) = limiter(Tier::Global, TierConfig::new(1, 1), FailureMode::Allow);

        assert!(limiter.allow("user", "").await);
        limiter.reset();
        assert!(!limiter.allow("user", "").await);

        store.clear();
        assert!(limiter.allow("user", "").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allow_admits_exactly_rate() {
        let (limiter, _) = limiter(Tier::Global, TierConfig::new(25, 1), FailureMode::Allow);
        let limiter = Arc::new(limiter);

        let calls = (0..100).map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.allow("user", "").await })
        });
        let results = futures::future::join_all(calls).await;

        let allowed = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(allowed, 25);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allow_below_rate_admits_all() {
        let (limiter, store) = limiter(Tier::Global, TierConfig::new(50, 1), FailureMode::Allow);
        let limiter = Arc::new(limiter);

        let calls = (0..20).map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.allow("user", "").await })
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.into_iter().all(|r| r.unwrap()));
        assert_eq!(store.get("global:user:").await.unwrap(), 20);
    }
}
