//! Rendering of rate limit decisions and API errors as HTTP responses.

use http::header::{HeaderName, CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, HeaderValue, Response};
use tracing::{error, info};

use super::errors::ApiError;
use crate::ratelimit::{RateDecision, RequestIdentity, Scope, Throttle, ThrottleVerdict};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const FALLBACK_BODY: &str =
    r#"{"error":{"code":"internal_server_error","message":"An unexpected error occurred. Please try again later.","type":"InternalServerError"}}"#;

/// Set the `X-RateLimit-*` headers, and `Retry-After` when the caller has
/// to wait.
pub fn apply_headers(decision: &RateDecision, headers: &mut HeaderMap) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_time));

    if decision.retry_after > 0 {
        headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after));
    }
}

/// Render any taxonomy error as a JSON response.
pub fn error_response(err: &ApiError) -> Response<String> {
    let body = serde_json::to_string(&err.body()).unwrap_or_else(|e| {
        error!(error = %e, code = err.kind.code(), "Failed to serialize error body");
        FALLBACK_BODY.to_string()
    });

    let mut response = Response::new(body);
    *response.status_mut() = err.status();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(retry_after) = err.retry_after {
        response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
    response
}

/// The 429 response for a denied decision, with rate limit headers.
pub fn denial_response(decision: &RateDecision) -> Response<String> {
    let mut response = error_response(&ApiError::rate_limited(decision));
    apply_headers(decision, response.headers_mut());
    response
}

/// Throttle a request before it reaches its handler.
///
/// Returns the decision to decorate the eventual response with (`None` when
/// the store was bypassed), or the response to send instead of running the
/// handler: 429 on denial, 503 when the store failed and the throttle fails
/// closed.
pub async fn admit(
    throttle: &Throttle,
    scope: Scope,
    identity: &RequestIdentity,
) -> Result<Option<RateDecision>, Response<String>> {
    match throttle.check(scope, identity).await {
        Ok(ThrottleVerdict::Decided(decision)) if decision.allowed => Ok(Some(decision)),
        Ok(ThrottleVerdict::Decided(decision)) => {
            info!(
                scope = %scope,
                identifier = identity.identifier(),
                retry_after = decision.retry_after,
                "Request throttled"
            );
            Err(denial_response(&decision))
        }
        Ok(ThrottleVerdict::Bypassed) => Ok(None),
        Err(e) => Err(error_response(&ApiError::from_internal(&e, throttle.debug_errors()))),
    }
}
