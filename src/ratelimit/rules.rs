//! Per-tier rate limit rules.
//!
//! A [`TierConfig`] carries the default rate and burst for one tier plus an
//! optional map of discriminator-specific rate overrides. It is validated
//! once when a limiter is built and never changes afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::key::Tier;
use crate::error::{Error, Result};

/// Rate and burst for a single tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Requests per second when no override matches
    pub rate: u32,
    /// Bucket capacity for local limiters
    pub burst: u32,
    /// Discriminator → requests per second
    #[serde(default)]
    pub overrides: HashMap<String, u32>,
}

impl TierConfig {
    /// Create a configuration without overrides.
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            rate,
            burst,
            overrides: HashMap::new(),
        }
    }

    /// Add a rate override for one discriminator.
    pub fn with_override(mut self, discriminator: impl Into<String>, rate: u32) -> Self {
        self.overrides.insert(discriminator.into(), rate);
        self
    }

    /// Resolve the rate for a discriminator, falling back to the default rate.
    pub fn rate_for(&self, discriminator: &str) -> u32 {
        self.overrides
            .get(discriminator)
            .copied()
            .unwrap_or(self.rate)
    }

    /// Check that every rate and the burst are positive.
    pub fn validate(&self, tier: Tier) -> Result<()> {
        if self.rate == 0 {
            return Err(invalid(tier, "rate must be positive".to_string()));
        }
        if self.burst == 0 {
            return Err(invalid(tier, "burst must be positive".to_string()));
        }
        if let Some((discriminator, _)) = self.overrides.iter().find(|(_, rate)| **rate == 0) {
            return Err(invalid(
                tier,
                format!("rate for {:?} must be positive", discriminator),
            ));
        }
        Ok(())
    }

    /// Check that no rate in this tier exceeds `ceiling`.
    pub fn validate_ceiling(&self, tier: Tier, ceiling: u32) -> Result<()> {
        if self.rate > ceiling {
            return Err(invalid(
                tier,
                format!("default rate ({}) cannot exceed global rate ({})", self.rate, ceiling),
            ));
        }
        if let Some((discriminator, rate)) = self.overrides.iter().find(|(_, rate)| **rate > ceiling) {
            return Err(invalid(
                tier,
                format!(
                    "rate for {:?} ({}) cannot exceed global rate ({})",
                    discriminator, rate, ceiling
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(tier: Tier, reason: String) -> Error {
    Error::InvalidTier {
        tier: tier.scope(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_for_prefers_override() {
        let config = TierConfig::new(10, 5).with_override("GET:/api/users", 20);

        assert_eq!(config.rate_for("GET:/api/users"), 20);
        assert_eq!(config.rate_for("POST:/api/users"), 10);
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let err = TierConfig::new(0, 5).validate(Tier::Global).unwrap_err();
        assert!(matches!(err, Error::InvalidTier { tier: "global", .. }));
    }

    #[test]
    fn test_validate_rejects_zero_burst() {
        assert!(TierConfig::new(5, 0).validate(Tier::Http).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_override() {
        let config = TierConfig::new(5, 5).with_override("/pkg.Svc/Get", 0);
        assert!(config.validate(Tier::GrpcMethod).is_err());
    }

    #[test]
    fn test_validate_ceiling() {
        let config = TierConfig::new(10, 5).with_override("GET:/hot", 200);

        assert!(config.validate_ceiling(Tier::HttpEndpoint, 100).is_err());
        assert!(config.validate_ceiling(Tier::HttpEndpoint, 200).is_ok());
        assert!(TierConfig::new(101, 5)
            .validate_ceiling(Tier::HttpEndpoint, 100)
            .is_err());
    }
}
