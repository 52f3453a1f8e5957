//! Token bucket implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};

/// Mutable state of a bucket, guarded by the bucket's own lock.
#[derive(Debug)]
struct BucketState {
    /// Tokens currently available
    tokens: u32,
    /// Instant at which the most recent whole token was credited
    last_refill: Instant,
}

/// A single-key token bucket with lazy, drift-free refill.
///
/// Tokens are credited only when the bucket is touched. The refill clock is
/// advanced by whole refill intervals, so the fractional remainder of the
/// elapsed time carries over to the next access instead of being lost.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens the bucket can hold
    capacity: u32,
    /// Time between two credited tokens
    refill_interval: Duration,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a full bucket driven by the system clock.
    ///
    /// A zero capacity or rate is clamped to 1.
    pub fn new(capacity: u32, refill_rate_per_second: u32) -> Self {
        Self::with_clock(capacity, refill_rate_per_second, Arc::new(SystemClock))
    }

    /// Create a full bucket driven by the given clock.
    pub fn with_clock(capacity: u32, refill_rate_per_second: u32, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        let rate = refill_rate_per_second.max(1);
        // Sub-nanosecond intervals are not representable.
        let refill_interval = (Duration::from_secs(1) / rate).max(Duration::from_nanos(1));
        let now = clock.now();

        Self {
            capacity,
            refill_interval,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
            clock,
        }
    }

    /// Consume one token if one is available.
    ///
    /// Returns `true` if the token was consumed, `false` if the bucket is empty.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Get the current token level without consuming.
    pub fn tokens(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Fill the bucket to capacity and restart the refill clock.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.capacity;
        state.last_refill = self.clock.now();
    }

    /// Get the capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the time between two credited tokens.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = self.clock.now().saturating_duration_since(state.last_refill);
        let interval = self.refill_interval.as_nanos();
        let tokens_to_add = elapsed.as_nanos() / interval;

        if tokens_to_add == 0 {
            return;
        }

        let credited = tokens_to_add.min(u128::from(self.capacity)) as u32;
        state.tokens = state.tokens.saturating_add(credited).min(self.capacity);

        // Advance by exactly tokens_to_add intervals: elapsed minus the remainder.
        let remainder = Duration::from_nanos((elapsed.as_nanos() % interval) as u64);
        state.last_refill += elapsed - remainder;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn bucket(capacity: u32, rate: u32) -> (TokenBucket, ManualClock) {
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(capacity, rate, Arc::new(clock.clone()));
        (bucket, clock)
    }

    #[test]
    fn test_fresh_bucket_allows_exactly_capacity() {
        for capacity in [1, 2, 5, 17] {
            let (bucket, _clock) = bucket(capacity, 3);

            for _ in 0..capacity {
                assert!(bucket.allow());
            }
            assert!(!bucket.allow(), "call {} should be denied", capacity + 1);
        }
    }

    #[test]
    fn test_refill_grants_one_token_per_interval() {
        let (bucket, clock) = bucket(2, 4);

        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(!bucket.allow());

        clock.advance(Duration::from_millis(250));
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn test_partial_interval_grants_nothing() {
        let (bucket, clock) = bucket(1, 2);

        assert!(bucket.allow());
        clock.advance(Duration::from_millis(499));
        assert!(!bucket.allow());
        clock.advance(Duration::from_millis(1));
        assert!(bucket.allow());
    }

    #[test]
    fn test_fractional_remainder_is_preserved() {
        let (bucket, clock) = bucket(10, 10);
        for _ in 0..10 {
            assert!(bucket.allow());
        }

        // 150ms credits one token and keeps 50ms towards the next.
        clock.advance(Duration::from_millis(150));
        assert_eq!(bucket.tokens(), 1);

        // Another 50ms completes the second interval.
        clock.advance(Duration::from_millis(50));
        assert_eq!(bucket.tokens(), 2);
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let (bucket, clock) = bucket(3, 100);

        assert!(bucket.allow());
        clock.advance(Duration::from_secs(3600));
        assert_eq!(bucket.tokens(), 3);
    }

    #[test]
    fn test_tokens_does_not_consume() {
        let (bucket, _clock) = bucket(4, 1);

        assert_eq!(bucket.tokens(), 4);
        assert_eq!(bucket.tokens(), 4);
        assert!(bucket.allow());
        assert_eq!(bucket.tokens(), 3);
    }

    #[test]
    fn test_zero_parameters_are_clamped() {
        let bucket = TokenBucket::new(0, 0);

        assert_eq!(bucket.capacity(), 1);
        assert_eq!(bucket.refill_interval(), Duration::from_secs(1));
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn test_reset_refills_to_capacity() {
        let (bucket, _clock) = bucket(3, 1);

        while bucket.allow() {}
        assert_eq!(bucket.tokens(), 0);

        bucket.reset();
        assert_eq!(bucket.tokens(), 3);
    }

    #[test]
    fn test_concurrent_allow_never_oversubscribes() {
        let (bucket, _clock) = bucket(50, 1);
        let bucket = Arc::new(bucket);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                std::thread::spawn(move || (0..20).filter(|_| bucket.allow()).count())
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }
}
