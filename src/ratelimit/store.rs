//! Window store trait shared by the Redis and in-memory implementations.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// What a store observed while recording one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Entries left in the window after trimming, before the new insert
    pub count_before: u64,
    /// Timestamp of the oldest of those entries
    pub oldest: Option<i64>,
}

/// Administrative view of one stored window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    /// Full stored key, including the store namespace
    pub key: String,
    /// Number of recorded entries
    pub count: u64,
    /// Seconds until the key expires, `-1` when it has no expiry
    pub ttl: i64,
}

/// An ordered time series per rate limit key.
///
/// Keys and patterns passed in are relative to the store's namespace prefix.
/// Patterns are globs where `*` matches any run of characters, `?` matches
/// one character and `\` escapes the next character.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically drop entries at or before `now - window_secs`, count what
    /// is left, record an entry at `now` and refresh the key TTL to
    /// `window_secs`.
    async fn record_and_count(&self, key: &str, now: i64, window_secs: u64) -> Result<WindowSnapshot>;

    /// Delete every key matching `pattern`, returning how many were removed.
    async fn clear(&self, pattern: &str) -> Result<usize>;

    /// List every key matching `pattern`, sorted by key.
    async fn enumerate(&self, pattern: &str) -> Result<Vec<KeyStatus>>;

    /// Delete exactly `keys`, given in full as `enumerate` reports them.
    async fn remove(&self, keys: &[String]) -> Result<usize>;
}

/// Escape glob metacharacters so `literal` only matches itself.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
