//! gRPC identity extraction and `RESOURCE_EXHAUSTED` statuses.

use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::Status;

use super::{normalize_identity, retry_after_secs};
use crate::ratelimit::Denial;

/// Read the caller identity from metadata `key`.
///
/// Missing, non-ASCII or blank values map to [`super::ANONYMOUS`].
pub fn extract_identity(metadata: &MetadataMap, key: &str) -> String {
    normalize_identity(metadata.get(key).and_then(|v| v.to_str().ok()))
}

/// Build the status returned for a denied call.
///
/// The limit and retry hint travel as `x-ratelimit-limit` and `retry-after`
/// trailers.
pub fn denial_status(denial: &Denial) -> Status {
    let mut status = Status::resource_exhausted(format!("rate limit exceeded: {}", denial.tier.label()));

    let metadata = status.metadata_mut();
    metadata.insert("x-ratelimit-limit", MetadataValue::from(denial.limit));
    metadata.insert("retry-after", MetadataValue::from(retry_after_secs(denial)));

    status
}
