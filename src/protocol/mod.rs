//! Translation of limiter decisions into HTTP-visible effects, the shared
//! error taxonomy, and administrative operations.

mod admin;
mod errors;
mod response;

pub use admin::{ClearOutcome, ClearSelector, RateLimitAdmin, TestProbe, TEST_KEY};
pub use errors::{ApiError, ErrorBody, ErrorDetail, ErrorKind, QuotaFields};
pub use response::{
    admit, apply_headers, denial_response, error_response, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
