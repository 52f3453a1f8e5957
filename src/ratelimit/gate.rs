//! Tier composition.
//!
//! The gate checks the global tier, then the protocol tier, then the
//! endpoint or method tier. Evaluation stops at the first denial, so a tier
//! after the denying one never has quota consumed for that request.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::backend::TierLimiter;
use super::key::{Protocol, Tier};
use crate::error::{Error, Result};

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denial {
    /// The tier that denied the request
    pub tier: Tier,
    /// That tier's limit for the request, in requests per second
    pub limit: u32,
    /// How long the caller should wait before retrying
    pub retry_after: Duration,
}

/// The outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(Denial),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// The tier that denied the request, if any.
    pub fn denied_tier(&self) -> Option<Tier> {
        match self {
            Decision::Allowed => None,
            Decision::Denied(denial) => Some(denial.tier),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allowed => f.write_str("allowed"),
            Decision::Denied(denial) => write!(f, "denied by {} tier", denial.tier),
        }
    }
}

/// Runs every tier for a request in fixed priority order.
pub struct CompositeGate {
    global: Arc<dyn TierLimiter>,
    http: Arc<dyn TierLimiter>,
    grpc: Arc<dyn TierLimiter>,
    http_endpoint: Arc<dyn TierLimiter>,
    grpc_method: Arc<dyn TierLimiter>,
}

impl CompositeGate {
    /// Assemble a gate from one limiter per tier.
    ///
    /// # Errors
    /// Returns a configuration error if a limiter is passed in the slot of
    /// a different tier.
    pub fn new(
        global: Arc<dyn TierLimiter>,
        http: Arc<dyn TierLimiter>,
        grpc: Arc<dyn TierLimiter>,
        http_endpoint: Arc<dyn TierLimiter>,
        grpc_method: Arc<dyn TierLimiter>,
    ) -> Result<Self> {
        let gate = Self {
            global,
            http,
            grpc,
            http_endpoint,
            grpc_method,
        };

        for tier in Tier::ALL {
            let actual = gate.limiter(tier).tier();
            if actual != tier {
                return Err(Error::Config(format!(
                    "{} limiter supplied for the {} tier",
                    actual, tier
                )));
            }
        }
        Ok(gate)
    }

    /// Get the limiter for a tier.
    pub fn limiter(&self, tier: Tier) -> &Arc<dyn TierLimiter> {
        match tier {
            Tier::Global => &self.global,
            Tier::Http => &self.http,
            Tier::Grpc => &self.grpc,
            Tier::HttpEndpoint => &self.http_endpoint,
            Tier::GrpcMethod => &self.grpc_method,
        }
    }

    /// The tiers a request on `protocol` passes through, in order.
    pub fn chain(protocol: Protocol) -> [Tier; 3] {
        [Tier::Global, protocol.tier(), protocol.endpoint_tier()]
    }

    /// Check a request against every tier.
    ///
    /// For HTTP, `method` and `path` form the endpoint discriminator. For
    /// gRPC, `method` is the full method name and `path` is ignored.
    pub async fn check(
        &self,
        identity: &str,
        protocol: Protocol,
        method: &str,
        path: &str,
    ) -> Decision {
        let endpoint = protocol.discriminator(method, path);

        for tier in Self::chain(protocol) {
            let limiter = self.limiter(tier);
            let discriminator = if tier.is_discriminated() { endpoint.as_str() } else { "" };

            if !limiter.allow(identity, discriminator).await {
                debug!(identity, protocol = %protocol, tier = %tier, discriminator, "Request denied");
                return Decision::Denied(Denial {
                    tier,
                    limit: limiter.limit(discriminator),
                    retry_after: limiter.retry_after(discriminator),
                });
            }
        }

        trace!(identity, protocol = %protocol, endpoint = %endpoint, "Request allowed");
        Decision::Allowed
    }

    /// Check a request, returning whether it is allowed and which tier
    /// denied it.
    pub async fn allow(
        &self,
        identity: &str,
        protocol: Protocol,
        method: &str,
        path: &str,
    ) -> (bool, Option<Tier>) {
        let decision = self.check(identity, protocol, method, path).await;
        (decision.is_allowed(), decision.denied_tier())
    }

    /// Remaining quota of one tier.
    pub async fn remaining_tokens(&self, tier: Tier, identity: &str, discriminator: &str) -> u32 {
        self.limiter(tier).remaining_tokens(identity, discriminator).await
    }

    /// Reset every tier. Test and administrative use only.
    pub fn reset(&self) {
        for tier in Tier::ALL {
            self.limiter(tier).reset();
        }
    }
}
