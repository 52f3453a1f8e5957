//! Limiter trait for abstracting local and distributed implementations.

use std::time::Duration;

use async_trait::async_trait;

use super::key::Tier;

/// One tier of rate limiting.
///
/// This trait abstracts over both the in-process [`super::ScopedLocalLimiter`]
/// and the store-backed [`super::ScopedDistributedLimiter`] so that the
/// [`super::CompositeGate`] can work with either.
#[async_trait]
pub trait TierLimiter: Send + Sync {
    /// The tier this limiter enforces.
    fn tier(&self) -> Tier;

    /// Consume one unit of quota for `identity` and `discriminator`.
    ///
    /// Returns `true` if the request is within the limit.
    async fn allow(&self, identity: &str, discriminator: &str) -> bool;

    /// Remaining quota for `identity` and `discriminator`, without consuming.
    async fn remaining_tokens(&self, identity: &str, discriminator: &str) -> u32;

    /// The configured limit for a discriminator, as reported to clients.
    fn limit(&self, discriminator: &str) -> u32;

    /// How long a denied caller should wait before retrying.
    fn retry_after(&self, discriminator: &str) -> Duration;

    /// Drop all limiter state. Test and administrative use only.
    fn reset(&self);
}
