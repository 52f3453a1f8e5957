//! Thin adapters between transports and the rate limit gate.
//!
//! Adapters only pull the caller identity out of a request and turn a
//! [`Denial`] into a protocol response. All limiting happens in
//! [`crate::ratelimit`].

pub mod grpc;
pub mod http;

use std::sync::Arc;

use ::http::{HeaderMap, Method, Response};
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::config::UserIdentification;
use crate::ratelimit::{CompositeGate, Decision, Denial, Protocol};

/// Identity used when a request carries none.
pub const ANONYMOUS: &str = "anonymous";

/// Whole seconds a denied caller should wait, never less than one.
pub fn retry_after_secs(denial: &Denial) -> u64 {
    let retry = denial.retry_after;
    let secs = retry.as_secs() + u64::from(retry.subsec_nanos() > 0);
    secs.max(1)
}

fn normalize_identity(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// A gate bundled with the names under which callers identify themselves.
#[derive(Clone)]
pub struct RateLimitGuard {
    gate: Arc<CompositeGate>,
    identification: UserIdentification,
}

impl RateLimitGuard {
    /// Create a guard around a gate.
    pub fn new(gate: Arc<CompositeGate>, identification: UserIdentification) -> Self {
        Self {
            gate,
            identification,
        }
    }

    /// Get the underlying gate.
    pub fn gate(&self) -> &Arc<CompositeGate> {
        &self.gate
    }

    /// Check an HTTP request, returning the `429` response to send if it is
    /// denied.
    pub async fn check_http(
        &self,
        headers: &HeaderMap,
        method: &Method,
        path: &str,
    ) -> Result<(), Response<String>> {
        let identity = http::extract_identity(headers, &self.identification.http_header);

        match self
            .gate
            .check(&identity, Protocol::Http, method.as_str(), path)
            .await
        {
            Decision::Allowed => Ok(()),
            Decision::Denied(denial) => Err(http::denial_response(&denial)),
        }
    }

    /// Check a gRPC call, returning the status to send if it is denied.
    pub async fn check_grpc(&self, metadata: &MetadataMap, full_method: &str) -> Result<(), Status> {
        let identity = grpc::extract_identity(metadata, &self.identification.grpc_metadata_key);

        match self
            .gate
            .check(&identity, Protocol::Grpc, full_method, "")
            .await
        {
            Decision::Allowed => Ok(()),
            Decision::Denied(denial) => Err(grpc::denial_status(&denial)),
        }
    }
}
