//! Configuration management for Quorate.
//!
//! Settings are read once at startup, validated, and then handed to the
//! [`crate::ratelimit::LimiterFactory`] as an immutable value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::ratelimit::{FailureMode, Tier, TierConfig};
use crate::store::RedisStoreConfig;

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "RATE_LIMIT";

/// Main configuration for the rate limiter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Per-tier limits
    #[serde(default)]
    pub rate_limits: RateLimits,

    /// Where adapters find the caller identity
    #[serde(default)]
    pub user_identification: UserIdentification,

    /// Shared store; when present every tier is distributed
    #[serde(default)]
    pub store: Option<RedisStoreConfig>,

    /// Decision applied when the shared store fails
    #[serde(default)]
    pub failure_mode: FailureMode,
}

/// Limits for every tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    /// Limit across all traffic of an identity
    #[serde(default = "default_global")]
    pub global: LimitConfig,

    /// HTTP-only and per-endpoint limits
    #[serde(default = "default_protocol")]
    pub http: ProtocolLimitConfig,

    /// gRPC-only and per-method limits
    #[serde(default = "default_protocol")]
    pub grpc: ProtocolLimitConfig,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            global: default_global(),
            http: default_protocol(),
            grpc: default_protocol(),
        }
    }
}

/// A plain rate and burst pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Requests per second
    pub rate: u32,
    /// Bucket capacity
    pub burst: u32,
}

/// Limits for one protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolLimitConfig {
    /// Protocol-only requests per second
    pub rate: u32,

    /// Protocol-only bucket capacity, also used by the endpoint/method tier
    pub burst: u32,

    /// Endpoint/method rate when no entry in `methods` matches
    #[serde(default = "default_method_rate")]
    pub default_method_rate: u32,

    /// `METHOD:/path` (HTTP) or full method name (gRPC) → requests per second
    #[serde(default)]
    pub methods: HashMap<String, u32>,
}

fn default_global() -> LimitConfig {
    LimitConfig {
        rate: 100,
        burst: 10,
    }
}

fn default_protocol() -> ProtocolLimitConfig {
    ProtocolLimitConfig {
        rate: 50,
        burst: 5,
        default_method_rate: default_method_rate(),
        methods: HashMap::new(),
    }
}

fn default_method_rate() -> u32 {
    10
}

/// Header and metadata names carrying the caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentification {
    /// HTTP header name
    #[serde(default = "default_http_header")]
    pub http_header: String,

    /// gRPC metadata key
    #[serde(default = "default_grpc_metadata_key")]
    pub grpc_metadata_key: String,
}

impl Default for UserIdentification {
    fn default() -> Self {
        Self {
            http_header: default_http_header(),
            grpc_metadata_key: default_grpc_metadata_key(),
        }
    }
}

fn default_http_header() -> String {
    "X-User-ID".to_string()
}

fn default_grpc_metadata_key() -> String {
    "user-id".to_string()
}

/// Scalar settings that can be overridden from the environment.
///
/// Variables are flat, e.g. `RATE_LIMIT_GLOBAL_RATE=200` sets `global_rate`.
/// The older names `RATE_LIMIT_GLOBAL`, `RATE_LIMIT_*_BURST_SIZE` and
/// `RATE_LIMIT_PER_ENDPOINT[_BURST_SIZE]` are accepted as aliases. Setting
/// both a name and its alias is an error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvOverrides {
    #[serde(alias = "global")]
    pub global_rate: Option<u32>,
    #[serde(alias = "global_burst_size")]
    pub global_burst: Option<u32>,
    /// Fallback burst for the global and HTTP tiers
    pub burst_size: Option<u32>,
    pub http_rate: Option<u32>,
    #[serde(alias = "http_burst_size", alias = "per_endpoint_burst_size")]
    pub http_burst: Option<u32>,
    #[serde(alias = "per_endpoint")]
    pub http_default_method_rate: Option<u32>,
    pub grpc_rate: Option<u32>,
    #[serde(alias = "grpc_burst_size")]
    pub grpc_burst: Option<u32>,
    pub grpc_default_method_rate: Option<u32>,
    pub user_header: Option<String>,
    pub grpc_metadata_key: Option<String>,
    pub failure_mode: Option<FailureMode>,
    pub store_url: Option<String>,
    /// Settings file used when none is passed explicitly
    pub config_path: Option<PathBuf>,
}

impl EnvOverrides {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Read overrides from an explicit environment source.
    pub fn from_source(source: config::Environment) -> Result<Self> {
        let overrides = config::Config::builder()
            .add_source(source.try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(overrides)
    }
}

impl Settings {
    /// Load configuration from a YAML or JSON file, chosen by extension.
    ///
    /// The result is validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = Self::parse_file(path.as_ref())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a YAML string. The result is validated.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load the effective settings: the file, then environment overrides on
    /// top, then validation.
    ///
    /// Without an explicit `path`, `RATE_LIMIT_CONFIG_PATH` names the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, EnvOverrides::from_env()?)
    }

    /// Load the effective settings against already-read overrides.
    pub fn load_with(path: Option<&Path>, overrides: EnvOverrides) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(|| overrides.config_path.clone());
        let mut settings = match path {
            Some(path) => Self::parse_file(&path)?,
            None => Settings::default(),
        };
        settings.apply_overrides(overrides);
        settings.validate()?;
        Ok(settings)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

        match extension {
            "json" => serde_json::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse JSON config {}: {}", path.display(), e))
            }),
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse YAML config {}: {}", path.display(), e))
            }),
            other => Err(Error::Config(format!(
                "Unsupported config file extension {:?}, supported: .json, .yaml, .yml",
                other
            ))),
        }
    }

    /// Apply environment overrides.
    pub fn apply_overrides(&mut self, overrides: EnvOverrides) {
        let limits = &mut self.rate_limits;
        apply(&mut limits.global.burst, overrides.burst_size);
        apply(&mut limits.http.burst, overrides.burst_size);
        apply(&mut limits.global.rate, overrides.global_rate);
        apply(&mut limits.global.burst, overrides.global_burst);
        apply(&mut limits.http.rate, overrides.http_rate);
        apply(&mut limits.http.burst, overrides.http_burst);
        apply(&mut limits.http.default_method_rate, overrides.http_default_method_rate);
        apply(&mut limits.grpc.rate, overrides.grpc_rate);
        apply(&mut limits.grpc.burst, overrides.grpc_burst);
        apply(&mut limits.grpc.default_method_rate, overrides.grpc_default_method_rate);

        let ids = &mut self.user_identification;
        apply(&mut ids.http_header, overrides.user_header);
        apply(&mut ids.grpc_metadata_key, overrides.grpc_metadata_key);
        apply(&mut self.failure_mode, overrides.failure_mode);

        if let Some(url) = overrides.store_url {
            match self.store.as_mut() {
                Some(store) => store.url = url,
                None => self.store = Some(RedisStoreConfig::new(url)),
            }
        }
    }

    /// Check every tier and the identity settings.
    ///
    /// Per-endpoint and per-method rates may not exceed the global rate.
    pub fn validate(&self) -> Result<()> {
        for tier in Tier::ALL {
            self.tier(tier).validate(tier)?;
        }

        let ceiling = self.rate_limits.global.rate;
        self.tier(Tier::HttpEndpoint)
            .validate_ceiling(Tier::HttpEndpoint, ceiling)?;
        self.tier(Tier::GrpcMethod)
            .validate_ceiling(Tier::GrpcMethod, ceiling)?;

        if self.user_identification.http_header.trim().is_empty() {
            return Err(Error::Config("http_header must not be empty".to_string()));
        }
        if self.user_identification.grpc_metadata_key.trim().is_empty() {
            return Err(Error::Config("grpc_metadata_key must not be empty".to_string()));
        }
        if let Some(store) = &self.store {
            if store.url.trim().is_empty() {
                return Err(Error::Config("store url must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Whether limiter state is shared through a store.
    pub fn is_distributed(&self) -> bool {
        self.store.is_some()
    }

    /// Build the configuration of one tier.
    ///
    /// The endpoint tier uses the HTTP burst and the method tier the gRPC
    /// burst; their default rate is the protocol's `default_method_rate`.
    pub fn tier(&self, tier: Tier) -> TierConfig {
        let limits = &self.rate_limits;
        match tier {
            Tier::Global => TierConfig::new(limits.global.rate, limits.global.burst),
            Tier::Http => TierConfig::new(limits.http.rate, limits.http.burst),
            Tier::Grpc => TierConfig::new(limits.grpc.rate, limits.grpc.burst),
            Tier::HttpEndpoint => method_tier(&limits.http),
            Tier::GrpcMethod => method_tier(&limits.grpc),
        }
    }
}

fn method_tier(protocol: &ProtocolLimitConfig) -> TierConfig {
    TierConfig {
        rate: protocol.default_method_rate,
        burst: protocol.burst,
        overrides: protocol.methods.clone(),
    }
}

fn apply<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}
