//! API error taxonomy shared by every handler of the platform.
//!
//! Errors leave the service in one envelope:
//! `{"error": {"code", "message", "type", ...}}`.

use http::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::error::NotiError;
use crate::ratelimit::RateDecision;

/// The closed set of error categories exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    AuthenticationFailed,
    PermissionDenied,
    NotFound,
    Conflict,
    RateLimitExceeded,
    ServiceUnavailable,
    Notification,
    TelegramBot,
    Database,
    ExternalService,
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Notification => "notification_error",
            ErrorKind::TelegramBot => "telegram_bot_error",
            ErrorKind::Database => "database_error",
            ErrorKind::ExternalService => "external_service_error",
            ErrorKind::Internal => "internal_server_error",
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Invalid input.",
            ErrorKind::AuthenticationFailed => "Authentication credentials were not provided.",
            ErrorKind::PermissionDenied => "You do not have permission to perform this action.",
            ErrorKind::NotFound => "The requested resource was not found.",
            ErrorKind::Conflict => "The request conflicts with the current state of the resource.",
            ErrorKind::RateLimitExceeded => "Rate limit exceeded. Please try again later.",
            ErrorKind::ServiceUnavailable => "Service temporarily unavailable. Please try again later.",
            ErrorKind::Notification => "Notification error occurred.",
            ErrorKind::TelegramBot => "Telegram bot error occurred.",
            ErrorKind::Database => "Database error occurred.",
            ErrorKind::ExternalService => "External service error occurred.",
            ErrorKind::Internal => "An unexpected error occurred. Please try again later.",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::Notification | ErrorKind::TelegramBot => StatusCode::BAD_REQUEST,
            ErrorKind::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Database | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ExternalService => StatusCode::BAD_GATEWAY,
        }
    }

    /// Type name reported in the `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::AuthenticationFailed => "AuthenticationError",
            ErrorKind::PermissionDenied => "PermissionError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::RateLimitExceeded => "RateLimitError",
            ErrorKind::ServiceUnavailable => "ServiceUnavailableError",
            ErrorKind::Notification => "NotificationError",
            ErrorKind::TelegramBot => "TelegramBotError",
            ErrorKind::Database => "DatabaseError",
            ErrorKind::ExternalService => "ExternalServiceError",
            ErrorKind::Internal => "InternalServerError",
        }
    }
}

/// Quota figures attached to rate limit errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaFields {
    pub limit: u64,
    pub remaining: u64,
    pub reset_time: i64,
}

/// An error ready to be rendered to a client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", .kind.code())]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    /// Per-field validation messages
    pub fields: BTreeMap<String, Vec<String>>,
    pub retry_after: Option<u64>,
    pub quota: Option<QuotaFields>,
    pub request_id: Option<String>,
    /// Underlying cause, only rendered in debug mode
    pub details: Option<String>,
}

impl ApiError {
    /// An error of `kind` with its default message.
    pub fn new(kind: ErrorKind) -> Self {
        Self::with_message(kind, kind.default_message())
    }

    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: BTreeMap::new(),
            retry_after: None,
            quota: None,
            request_id: None,
            details: None,
        }
    }

    /// A validation error carrying per-field messages.
    pub fn validation(fields: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            fields,
            ..Self::with_message(ErrorKind::Validation, "Validation failed")
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self::with_message(ErrorKind::NotFound, format!("{} not found", resource))
    }

    pub fn service_unavailable() -> Self {
        Self::new(ErrorKind::ServiceUnavailable)
    }

    /// The 429 error for a denied decision.
    pub fn rate_limited(decision: &RateDecision) -> Self {
        Self {
            retry_after: Some(decision.retry_after),
            quota: Some(QuotaFields {
                limit: decision.limit,
                remaining: decision.remaining,
                reset_time: decision.reset_time,
            }),
            ..Self::with_message(
                ErrorKind::RateLimitExceeded,
                format!(
                    "You have exceeded the rate limit of {} requests per {} seconds",
                    decision.limit, decision.window
                ),
            )
        }
    }

    /// Wrap an internal error. Store failures become `service_unavailable`;
    /// anything else is an internal error whose cause is only exposed when
    /// `debug` is set.
    pub fn from_internal(err: &NotiError, debug: bool) -> Self {
        let kind = if err.is_store_failure() {
            ErrorKind::ServiceUnavailable
        } else {
            ErrorKind::Internal
        };
        Self {
            details: debug.then(|| err.to_string()),
            ..Self::new(kind)
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// The serializable response envelope.
    pub fn body(&self) -> ErrorBody<'_> {
        ErrorBody {
            error: ErrorDetail {
                code: self.kind.code(),
                message: &self.message,
                error_type: self.kind.type_name(),
                fields: (!self.fields.is_empty()).then_some(&self.fields),
                retry_after: self.retry_after,
                quota: self.quota.as_ref(),
                request_id: self.request_id.as_deref(),
                details: self.details.as_deref(),
            },
        }
    }
}

impl From<NotiError> for ApiError {
    fn from(err: NotiError) -> Self {
        Self::from_internal(&err, false)
    }
}

/// `{"error": {...}}`
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: ErrorDetail<'a>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail<'a> {
    pub code: &'static str,
    pub message: &'a str,
    #[serde(rename = "type")]
    pub error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<&'a BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(flatten)]
    pub quota: Option<&'a QuotaFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a str>,
}
