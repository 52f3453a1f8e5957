//! Error types for the Quorate rate limiter.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Quorate operations.
///
/// Only construction and startup paths return these. Request-path
/// decisions are plain booleans or [`crate::ratelimit::Decision`] values.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tier was given parameters it cannot be built with
    #[error("Invalid {tier} tier configuration: {reason}")]
    InvalidTier {
        /// Scope name of the offending tier
        tier: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Shared store errors surfaced outside the request path
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias for Quorate operations.
pub type Result<T> = std::result::Result<T, Error>;
