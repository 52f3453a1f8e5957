//! Tier identifiers and rate limit key generation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One axis of rate limiting, evaluated independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Per identity, across every request
    Global,
    /// Per identity, HTTP requests only
    Http,
    /// Per identity, gRPC requests only
    Grpc,
    /// Per identity and HTTP `{method}:{path}`
    HttpEndpoint,
    /// Per identity and gRPC full method name
    GrpcMethod,
}

impl Tier {
    /// Every tier, in no particular order.
    pub const ALL: [Tier; 5] = [
        Tier::Global,
        Tier::Http,
        Tier::Grpc,
        Tier::HttpEndpoint,
        Tier::GrpcMethod,
    ];

    /// The scope name used as the first key segment.
    pub fn scope(&self) -> &'static str {
        match self {
            Tier::Global => "global",
            Tier::Http => "http",
            Tier::Grpc => "grpc",
            Tier::HttpEndpoint => "endpoint",
            Tier::GrpcMethod => "method",
        }
    }

    /// The name reported to callers when this tier denies a request.
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Global => "global",
            Tier::Http => "http",
            Tier::Grpc => "grpc",
            Tier::HttpEndpoint => "per-endpoint",
            Tier::GrpcMethod => "per-method",
        }
    }

    /// Whether keys in this tier carry a discriminator.
    pub fn is_discriminated(&self) -> bool {
        matches!(self, Tier::HttpEndpoint | Tier::GrpcMethod)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scope())
    }
}

/// The transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Grpc,
}

impl Protocol {
    /// The protocol-only tier for this transport.
    pub fn tier(&self) -> Tier {
        match self {
            Protocol::Http => Tier::Http,
            Protocol::Grpc => Tier::Grpc,
        }
    }

    /// The endpoint or method tier for this transport.
    pub fn endpoint_tier(&self) -> Tier {
        match self {
            Protocol::Http => Tier::HttpEndpoint,
            Protocol::Grpc => Tier::GrpcMethod,
        }
    }

    /// Build the endpoint-tier discriminator.
    ///
    /// HTTP requests are keyed by `{method}:{path}`; gRPC requests by the
    /// full method name passed as `method` (the path is ignored).
    pub fn discriminator(&self, method: &str, path: &str) -> String {
        match self {
            Protocol::Http => format!("{}:{}", method, path),
            Protocol::Grpc => method.to_string(),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => f.write_str("http"),
            Protocol::Grpc => f.write_str("grpc"),
        }
    }
}

/// A namespaced key of the form `{scope}:{identity}:{discriminator}`.
///
/// The identity is the only caller-controlled segment that is followed by a
/// separator, so `%` and `:` inside it are percent-escaped. Keys from
/// different scopes, identities or discriminators therefore never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Build the key for an identity and discriminator within a tier.
    pub fn new(tier: Tier, identity: &str, discriminator: &str) -> Self {
        let mut key = String::with_capacity(
            tier.scope().len() + identity.len() + discriminator.len() + 2,
        );
        key.push_str(tier.scope());
        key.push(':');
        for c in identity.chars() {
            match c {
                '%' => key.push_str("%25"),
                ':' => key.push_str("%3A"),
                _ => key.push(c),
            }
        }
        key.push(':');
        key.push_str(discriminator);
        Self(key)
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
