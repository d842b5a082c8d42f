//! Per-scope rate limit policies.
//!
//! All rate strings are parsed when the policy table is built, so a bad
//! configuration fails at startup rather than on the first request.

use tracing::info;

use super::key::{RateLimitKey, RequestIdentity, Scope};
use super::rate::RateLimitPolicy;
use crate::config::RateLimitingConfig;
use crate::error::{NotiError, Result};

/// Policy table covering every `Scope`.
#[derive(Debug, Clone)]
pub struct ScopePolicies {
    anonymous: RateLimitPolicy,
    user: RateLimitPolicy,
    endpoint: RateLimitPolicy,
    notification: RateLimitPolicy,
    telegram_webhook: RateLimitPolicy,
}

impl ScopePolicies {
    /// Build the table from configured rate strings.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        Ok(Self {
            anonymous: parse_rate(Scope::Anonymous, &config.anon_rate)?,
            user: parse_rate(Scope::User, &config.user_rate)?,
            endpoint: parse_rate(Scope::Endpoint, &config.endpoint_rate)?,
            notification: parse_rate(Scope::Notification, &config.notification_rate)?,
            telegram_webhook: parse_rate(Scope::TelegramWebhook, &config.telegram_webhook_rate)?,
        })
    }

    /// Replace the policy of a single scope.
    pub fn with_policy(mut self, scope: Scope, policy: RateLimitPolicy) -> Self {
        *self.slot_mut(scope) = policy;
        self
    }

    /// Get the policy for a scope.
    pub fn get(&self, scope: Scope) -> RateLimitPolicy {
        match scope {
            Scope::Anonymous => self.anonymous,
            Scope::User => self.user,
            Scope::Endpoint => self.endpoint,
            Scope::Notification => self.notification,
            Scope::TelegramWebhook => self.telegram_webhook,
        }
    }

    fn slot_mut(&mut self, scope: Scope) -> &mut RateLimitPolicy {
        match scope {
            Scope::Anonymous => &mut self.anonymous,
            Scope::User => &mut self.user,
            Scope::Endpoint => &mut self.endpoint,
            Scope::Notification => &mut self.notification,
            Scope::TelegramWebhook => &mut self.telegram_webhook,
        }
    }

    /// Resolve the key and policy that apply to `identity` under `scope`.
    pub fn resolve(&self, scope: Scope, identity: &RequestIdentity) -> (RateLimitKey, RateLimitPolicy) {
        (scope.key_for(identity), self.get(scope))
    }
}

fn parse_rate(scope: Scope, rate: &str) -> Result<RateLimitPolicy> {
    let policy: RateLimitPolicy = rate
        .parse()
        .map_err(|e| NotiError::Config(format!("Invalid rate for scope '{}': {}", scope, e)))?;
    info!(scope = %scope, limit = policy.limit(), window = policy.window_secs(), "Loaded rate limit policy");
    Ok(policy)
}
