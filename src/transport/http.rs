//! HTTP identity extraction and `429` responses.

use ::http::header::{CONTENT_TYPE, RETRY_AFTER};
use ::http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};

use super::{normalize_identity, retry_after_secs};
use crate::ratelimit::Denial;

/// Response header carrying the denying tier's limit.
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";

/// Read the caller identity from `header_name`.
///
/// Missing, non-ASCII or blank values map to [`super::ANONYMOUS`].
pub fn extract_identity(headers: &HeaderMap, header_name: &str) -> String {
    normalize_identity(headers.get(header_name).and_then(|v| v.to_str().ok()))
}

/// Build the `429 Too Many Requests` response for a denial.
pub fn denial_response(denial: &Denial) -> Response<String> {
    let body = serde_json::json!({
        "error": "rate limit exceeded",
        "type": denial.tier.label(),
    })
    .to_string();

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_LIMIT),
        HeaderValue::from(denial.limit),
    );
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(denial)));

    response
}
