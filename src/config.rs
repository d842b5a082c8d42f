//! Configuration management for the rate limiting core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{NotiError, Result};

/// Environment variable prefix for configuration overrides,
/// e.g. `NOTI__RATE_LIMITING__USER_RATE=500/hour`.
const ENV_PREFIX: &str = "NOTI";

/// Main configuration for the rate limiting service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotiConfig {
    /// Window store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Include internal error details in rendered error responses
    #[serde(default)]
    pub debug: bool,
}

/// Which window store implementation backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

/// Window store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Namespace prepended to every rate limit key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound on a single store call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// The store call timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_key_prefix() -> String {
    "rate_limit:".to_string()
}

fn default_timeout_ms() -> u64 {
    250
}

/// What the host does when the window store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Reject the request with `service_unavailable`.
    #[default]
    FailClosed,
    /// Let the request through unmetered.
    FailOpen,
}

/// Rate limiting configuration. Rates use the `"<count>/<period>"` format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Budget for anonymous callers, keyed by IP
    #[serde(default = "default_anon_rate")]
    pub anon_rate: String,

    /// Budget for authenticated users
    #[serde(default = "default_user_rate")]
    pub user_rate: String,

    /// Per-endpoint budget
    #[serde(default = "default_endpoint_rate")]
    pub endpoint_rate: String,

    /// Budget for notification sending
    #[serde(default = "default_notification_rate")]
    pub notification_rate: String,

    /// Budget for Telegram webhook deliveries
    #[serde(default = "default_telegram_webhook_rate")]
    pub telegram_webhook_rate: String,

    /// Behaviour when the store is unavailable
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Suffix keys with a coarse time bucket to bound storage growth
    #[serde(default)]
    pub bucketed_keys: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            anon_rate: default_anon_rate(),
            user_rate: default_user_rate(),
            endpoint_rate: default_endpoint_rate(),
            notification_rate: default_notification_rate(),
            telegram_webhook_rate: default_telegram_webhook_rate(),
            failure_policy: FailurePolicy::default(),
            bucketed_keys: false,
        }
    }
}

fn default_anon_rate() -> String {
    "100/hour".to_string()
}

fn default_user_rate() -> String {
    "1000/hour".to_string()
}

fn default_endpoint_rate() -> String {
    "200/hour".to_string()
}

fn default_notification_rate() -> String {
    "50/hour".to_string()
}

fn default_telegram_webhook_rate() -> String {
    "1000/hour".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NotiConfig {
    /// Load configuration from an optional file, layered with `NOTI__*`
    /// environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| NotiError::Config(e.to_string()))
    }
}
