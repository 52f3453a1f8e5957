//! In-process scoped rate limiter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::backend::TierLimiter;
use super::bucket::TokenBucket;
use super::key::{RateLimitKey, Tier};
use super::rules::TierConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

type BucketMap = DashMap<RateLimitKey, Arc<TokenBucket>>;

/// A token-bucket limiter for one tier.
///
/// Buckets are created lazily, one per key, and live until [`reset`] is
/// called. Unrelated keys never contend on a shared lock: the map is sharded
/// and every bucket carries its own mutex.
///
/// [`reset`]: ScopedLocalLimiter::reset
pub struct ScopedLocalLimiter {
    tier: Tier,
    config: TierConfig,
    /// Swapped wholesale on reset; request paths only take the read side.
    buckets: RwLock<Arc<BucketMap>>,
    clock: Arc<dyn Clock>,
}

impl ScopedLocalLimiter {
    /// Create a limiter for `tier` driven by the system clock.
    ///
    /// # Errors
    /// Returns a configuration error if any rate or the burst is zero.
    pub fn new(tier: Tier, config: TierConfig) -> Result<Self> {
        Self::with_clock(tier, config, Arc::new(SystemClock))
    }

    /// Create a limiter for `tier` whose buckets are driven by `clock`.
    pub fn with_clock(tier: Tier, config: TierConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate(tier)?;

        debug!(
            tier = %tier,
            rate = config.rate,
            burst = config.burst,
            overrides = config.overrides.len(),
            "Creating local limiter"
        );

        Ok(Self {
            tier,
            config,
            buckets: RwLock::new(Arc::new(DashMap::new())),
            clock,
        })
    }

    /// Consume one token for `identity` and `discriminator`.
    ///
    /// Never suspends; the only lock held across the call is the bucket's.
    pub fn allow(&self, identity: &str, discriminator: &str) -> bool {
        let key = RateLimitKey::new(self.tier, identity, discriminator);
        let bucket = self.get_or_create_bucket(key.clone(), discriminator);
        let allowed = bucket.allow();

        trace!(tier = %self.tier, key = %key, allowed, "Checked local rate limit");
        if !allowed {
            debug!(tier = %self.tier, identity, discriminator, "Local rate limit exceeded");
        }

        allowed
    }

    /// Tokens left for `identity` and `discriminator`.
    ///
    /// Keys that have never been seen report the full burst; reading never
    /// creates a bucket.
    pub fn remaining_tokens(&self, identity: &str, discriminator: &str) -> u32 {
        let key = RateLimitKey::new(self.tier, identity, discriminator);
        let buckets = self.buckets();

        // Clone out of the map before touching the bucket lock.
        let bucket = buckets.get(&key).map(|entry| Arc::clone(entry.value()));
        match bucket {
            Some(bucket) => bucket.tokens(),
            None => self.config.burst,
        }
    }

    /// Replace every bucket with an empty map.
    pub fn reset(&self) {
        *self.buckets.write() = Arc::new(DashMap::new());
    }

    /// Number of buckets currently held.
    pub fn bucket_count(&self) -> usize {
        self.buckets().len()
    }

    /// Get the tier configuration.
    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    fn buckets(&self) -> Arc<BucketMap> {
        self.buckets.read().clone()
    }

    /// Look up the bucket for `key`, inserting a new one if absent.
    ///
    /// Concurrent first accesses each build a candidate; the first insert
    /// wins and the other candidates are dropped.
    fn get_or_create_bucket(&self, key: RateLimitKey, discriminator: &str) -> Arc<TokenBucket> {
        let buckets = self.buckets();

        if let Some(existing) = buckets.get(&key) {
            return Arc::clone(existing.value());
        }

        let rate = self.config.rate_for(discriminator);
        let candidate = Arc::new(TokenBucket::with_clock(
            self.config.burst,
            rate,
            Arc::clone(&self.clock),
        ));

        let bucket = Arc::clone(buckets.entry(key.clone()).or_insert(candidate).value());
        debug!(tier = %self.tier, key = %key, rate, burst = self.config.burst, "Bucket ready");
        bucket
    }
}

#[async_trait]
impl TierLimiter for ScopedLocalLimiter {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn allow(&self, identity: &str, discriminator: &str) -> bool {
        ScopedLocalLimiter::allow(self, identity, discriminator)
    }

    async fn remaining_tokens(&self, identity: &str, discriminator: &str) -> u32 {
        ScopedLocalLimiter::remaining_tokens(self, identity, discriminator)
    }

    fn limit(&self, discriminator: &str) -> u32 {
        self.config.rate_for(discriminator)
    }

    fn retry_after(&self, discriminator: &str) -> Duration {
        Duration::from_secs(1) / self.config.rate_for(discriminator).max(1)
    }

    fn reset(&self) {
        ScopedLocalLimiter::reset(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;

    fn limiter(tier: Tier, config: TierConfig) -> (ScopedLocalLimiter, ManualClock) {
        let clock = ManualClock::new();
        let limiter = ScopedLocalLimiter::with_clock(tier, config, Arc::new(clock.clone())).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_limiter_creation() {
        let (limiter, _) = limiter(Tier::Global, TierConfig::new(10, 5));
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = ScopedLocalLimiter::new(Tier::Http, TierConfig::new(10, 0));
        assert!(matches!(result, Err(Error::InvalidTier { tier: "http", .. })));
    }

    #[test]
    fn test_global_burst_then_deny() {
        let (limiter, _) = limiter(Tier::Global, TierConfig::new(2, 2));

        assert!(limiter.allow("user", ""));
        assert!(limiter.allow("user", ""));
        assert!(!limiter.allow("user", ""));
    }

    #[test]
    fn test_identities_are_isolated() {
        let (limiter, _) = limiter(Tier::Global, TierConfig::new(1, 1));

        assert!(limiter.allow("alice", ""));
        assert!(!limiter.allow("alice", ""));
        assert!(limiter.allow("bob", ""));
    }

    #[test]
    fn test_endpoints_are_isolated() {
        let (limiter, _) = limiter(Tier::HttpEndpoint, TierConfig::new(10, 1));

        assert!(limiter.allow("user", "GET:/a"));
        assert!(limiter.allow("user", "POST:/a"));
        assert!(!limiter.allow("user", "GET:/a"));
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_override_rate_drives_refill() {
        let config = TierConfig::new(1, 1).with_override("GET:/fast", 10);
        let (limiter, clock) = limiter(Tier::HttpEndpoint, config);

        assert!(limiter.allow("user", "GET:/fast"));
        assert!(limiter.allow("user", "GET:/slow"));

        clock.advance(Duration::from_millis(100));
        assert!(limiter.allow("user", "GET:/fast"));
        assert!(!limiter.allow("user", "GET:/slow"));
    }

    #[test]
    fn test_remaining_tokens_does_not_create_bucket() {
        let (limiter, _) = limiter(Tier::Grpc, TierConfig::new(5, 7));

        assert_eq!(limiter.remaining_tokens("user", ""), 7);
        assert_eq!(limiter.bucket_count(), 0);

        limiter.allow("user", "");
        assert_eq!(limiter.remaining_tokens("user", ""), 6);
    }

    #[test]
    fn test_reset_drops_buckets() {
        let (limiter, _) = limiter(Tier::Global, TierConfig::new(1, 1));

        assert!(limiter.allow("user", ""));
        assert!(!limiter.allow("user", ""));

        limiter.reset();
        assert_eq!(limiter.bucket_count(), 0);
        assert!(limiter.allow("user", ""));
    }

    #[test]
    fn test_concurrent_first_access_shares_one_bucket() {
        let (limiter, _) = limiter(Tier::Global, TierConfig::new(1, 10));
        let limiter = Arc::new(limiter);
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    (0..5).filter(|_| limiter.allow("user", "")).count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 10);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[tokio::test]
    async fn test_trait_surface_matches_inherent() {
        let (limiter, _) = limiter(Tier::Http, TierConfig::new(4, 2));
        let tier: &dyn TierLimiter = &limiter;

        assert_eq!(tier.tier(), Tier::Http);
        assert!(tier.allow("user", "").await);
        assert_eq!(tier.remaining_tokens("user", "").await, 1);
        assert_eq!(tier.limit(""), 4);
        assert_eq!(tier.retry_after(""), Duration::from_millis(250));
    }
}
