//! Request identities, scopes and rate limit key generation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthenticatedUser {
    pub id: u64,
    pub username: String,
}

/// Who is making a request, as resolved by the web layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
    /// `None` for anonymous callers
    pub user: Option<AuthenticatedUser>,
    pub client_ip: IpAddr,
    pub method: String,
    pub path: String,
}

impl RequestIdentity {
    /// An anonymous request from `client_ip`.
    pub fn anonymous(client_ip: IpAddr, method: &str, path: &str) -> Self {
        Self {
            user: None,
            client_ip,
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    /// A request from an authenticated user.
    pub fn authenticated(id: u64, username: &str, client_ip: IpAddr, method: &str, path: &str) -> Self {
        Self {
            user: Some(AuthenticatedUser {
                id,
                username: username.to_string(),
            }),
            ..Self::anonymous(client_ip, method, path)
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Name used in logs and decisions.
    pub fn identifier(&self) -> &str {
        self.user.as_ref().map_or("anonymous", |u| u.username.as_str())
    }

    /// `user:<id>` when authenticated, otherwise `ip:<addr>`.
    fn actor(&self) -> String {
        match &self.user {
            Some(user) => user_key(user.id),
            None => ip_key(self.client_ip),
        }
    }
}

/// A named rate limit budget. Every scope has its own key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Keyed by client IP regardless of authentication
    Anonymous,
    /// Keyed by user, falling back to IP for anonymous callers
    User,
    /// Keyed by method, path and actor
    Endpoint,
    /// Notification sending, keyed by actor
    Notification,
    /// Telegram webhook deliveries, keyed by IP
    TelegramWebhook,
}

impl Scope {
    pub const ALL: [Scope; 5] = [
        Scope::Anonymous,
        Scope::User,
        Scope::Endpoint,
        Scope::Notification,
        Scope::TelegramWebhook,
    ];

    /// Scope applied to ordinary API traffic.
    pub fn default_for(identity: &RequestIdentity) -> Self {
        if identity.is_authenticated() {
            Scope::User
        } else {
            Scope::Anonymous
        }
    }

    /// Derive the rate limit key for `identity` under this scope.
    pub fn key_for(&self, identity: &RequestIdentity) -> RateLimitKey {
        let key = match self {
            Scope::Anonymous => ip_key(identity.client_ip),
            Scope::User => identity.actor(),
            Scope::Endpoint => format!(
                "endpoint:{}:{}:{}",
                identity.method.to_ascii_uppercase(),
                identity.path,
                identity.actor()
            ),
            Scope::Notification => format!("notification:{}", identity.actor()),
            Scope::TelegramWebhook => format!("telegram:webhook:{}", ip_key(identity.client_ip)),
        };
        RateLimitKey(key)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Anonymous => "anonymous",
            Scope::User => "user",
            Scope::Endpoint => "endpoint",
            Scope::Notification => "notification",
            Scope::TelegramWebhook => "telegram_webhook",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key identifying one actor's window within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Wrap an already-formed key, e.g. one supplied by an operator.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn user_key(id: u64) -> String {
    format!("user:{}", id)
}

pub fn ip_key(ip: IpAddr) -> String {
    format!("ip:{}", ip)
}
