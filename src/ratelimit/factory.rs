//! Limiter construction.
//!
//! The factory decides once, when it is built, whether tiers keep their
//! state in process or in a shared store. Every limiter it creates uses the
//! same choice, so tiers are never mixed within a process.

use std::sync::Arc;

use tracing::info;

use super::backend::TierLimiter;
use super::distributed::ScopedDistributedLimiter;
use super::gate::CompositeGate;
use super::key::Tier;
use super::limiter::ScopedLocalLimiter;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::Result;
use crate::store::{CounterStore, RedisStore};

/// Builds tier limiters from validated settings.
pub struct LimiterFactory {
    settings: Settings,
    store: Option<Arc<dyn CounterStore>>,
    clock: Arc<dyn Clock>,
}

impl LimiterFactory {
    /// Create a factory whose limiters keep state in process.
    pub fn local(settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            store: None,
            clock: Arc::new(SystemClock),
        })
    }

    /// Create a factory whose limiters share state through `store`.
    pub fn distributed(settings: Settings, store: Arc<dyn CounterStore>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            store: Some(store),
            clock: Arc::new(SystemClock),
        })
    }

    /// Create a factory from settings alone, connecting to the configured
    /// store if there is one.
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        match settings.store.clone() {
            Some(store_config) => {
                let store = RedisStore::connect(store_config).await?;
                Self::distributed(settings, Arc::new(store))
            }
            None => Self::local(settings),
        }
    }

    /// Drive local token buckets from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether limiters created by this factory are distributed.
    pub fn is_distributed(&self) -> bool {
        self.store.is_some()
    }

    /// The shared store, if any.
    pub fn store(&self) -> Option<&Arc<dyn CounterStore>> {
        self.store.as_ref()
    }

    /// Get the settings this factory was built from.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Create the limiter for one tier.
    pub fn create(&self, tier: Tier) -> Result<Arc<dyn TierLimiter>> {
        let config = self.settings.tier(tier);

        let limiter: Arc<dyn TierLimiter> = match &self.store {
            Some(store) => Arc::new(ScopedDistributedLimiter::new(
                tier,
                config,
                Arc::clone(store),
                self.settings.failure_mode,
            )?),
            None => Arc::new(ScopedLocalLimiter::with_clock(
                tier,
                config,
                Arc::clone(&self.clock),
            )?),
        };
        Ok(limiter)
    }

    /// Create one limiter per tier and assemble them into a gate.
    pub fn build_gate(&self) -> Result<CompositeGate> {
        info!(
            distributed = self.is_distributed(),
            failure_mode = %self.settings.failure_mode,
            "Building rate limit gate"
        );

        CompositeGate::new(
            self.create(Tier::Global)?,
            self.create(Tier::Http)?,
            self.create(Tier::Grpc)?,
            self.create(Tier::HttpEndpoint)?,
            self.create(Tier::GrpcMethod)?,
        )
    }
}
