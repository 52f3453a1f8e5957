//! Behaviour when the shared counter store is unavailable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What the distributed tiers decide when the store returns an error.
///
/// Applied uniformly to every store failure in a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Fail open: let the request through
    #[default]
    Allow,
    /// Fail closed: reject the request
    Deny,
}

impl FailureMode {
    /// The `allow` outcome to report for a failed store call.
    pub fn on_store_error(&self) -> bool {
        match self {
            FailureMode::Allow => true,
            FailureMode::Deny => false,
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMode::Allow => f.write_str("allow"),
            FailureMode::Deny => f.write_str("deny"),
        }
    }
}
