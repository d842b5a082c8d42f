//! Sliding-window rate limiter.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::key::RateLimitKey;
use super::rate::RateLimitPolicy;
use super::store::WindowStore;
use crate::error::Result;

/// The outcome of one rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one
    pub remaining: u64,
    /// Epoch seconds at which the oldest counted request leaves the window
    pub reset_time: i64,
    /// Seconds to wait before retrying; zero when allowed
    pub retry_after: u64,
    pub limit: u64,
    /// Window length in seconds
    pub window: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

/// Decides allow/deny for a key against a shared `WindowStore`.
///
/// Every check records the request, including denied ones, so callers that
/// keep retrying stay limited until their requests age out of the window.
/// Store failures are returned to the caller as errors; the limiter never
/// substitutes a decision of its own.
pub struct SlidingWindowLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    /// Suffix keys with `(now - window) / window`
    bucketed_keys: bool,
}

impl SlidingWindowLimiter {
    /// Create a limiter over `store` using the system clock.
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            bucketed_keys: false,
        }
    }

    /// Partition each key's window into coarse time buckets so that keys of
    /// idle periods are never touched again and simply expire.
    pub fn bucketed(mut self, enabled: bool) -> Self {
        self.bucketed_keys = enabled;
        self
    }

    /// The store this limiter records into.
    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    /// Check and record one request for `key`.
    pub async fn check(
        &self,
        key: &RateLimitKey,
        policy: RateLimitPolicy,
        identifier: Option<&str>,
    ) -> Result<RateDecision> {
        let now = self.clock.now();
        let limit = policy.limit();
        let window = policy.window_secs();
        let storage_key = self.storage_key(key, now, window);

        trace!(key = %storage_key, limit = limit, window = window, "Checking rate limit");

        let snapshot = self.store.record_and_count(&storage_key, now, window).await.map_err(|e| {
            warn!(key = %storage_key, error = %e, "Window store failed during rate limit check");
            e
        })?;

        let count = snapshot.count_before;
        let allowed = count < limit;
        let remaining = if allowed { limit - count - 1 } else { 0 };
        let reset_time = snapshot.oldest.unwrap_or(now) + window as i64;
        let retry_after = if allowed {
            0
        } else {
            (reset_time - now).max(0) as u64
        };

        if !allowed {
            debug!(
                key = %storage_key,
                count = count,
                limit = limit,
                identifier = identifier.unwrap_or("-"),
                retry_after = retry_after,
                "Rate limit exceeded"
            );
        }

        Ok(RateDecision {
            allowed,
            remaining,
            reset_time,
            retry_after,
            limit,
            window,
            identifier: identifier.map(str::to_string),
        })
    }

    fn storage_key(&self, key: &RateLimitKey, now: i64, window: u64) -> String {
        if self.bucketed_keys {
            let window = window as i64;
            format!("{}:{}", key, (now - window).div_euclid(window))
        } else {
            key.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotiError;
    use crate::ratelimit::clock::MockClock;
    use crate::ratelimit::memory::MemoryWindowStore;
    use crate::ratelimit::store::{KeyStatus, WindowSnapshot};
    use async_trait::async_trait;

    const T0: i64 = 1_700_000_000;

    fn limiter() -> (SlidingWindowLimiter, MockClock) {
        let clock = MockClock::new(T0);
        let store = Arc::new(MemoryWindowStore::new("rate_limit:", Arc::new(clock.clone())));
        (SlidingWindowLimiter::with_clock(store, Arc::new(clock.clone())), clock)
    }

    fn policy(limit: u64, window: u64) -> RateLimitPolicy {
        RateLimitPolicy::new(limit, window).unwrap()
    }

    struct UnavailableStore;

    #[async_trait]
    impl WindowStore for UnavailableStore {
        async fn record_and_count(&self, _key: &str, _now: i64, _window_secs: u64) -> Result<WindowSnapshot> {
            Err(NotiError::StoreUnavailable("connection refused".to_string()))
        }

        async fn clear(&self, _pattern: &str) -> Result<usize> {
            Err(NotiError::StoreUnavailable("connection refused".to_string()))
        }

        async fn enumerate(&self, _pattern: &str) -> Result<Vec<KeyStatus>> {
            Err(NotiError::StoreUnavailable("connection refused".to_string()))
        }

        async fn remove(&self, _keys: &[String]) -> Result<usize> {
            Err(NotiError::StoreUnavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_remaining_declines_to_zero() {
        let (limiter, _) = limiter();
        let key = RateLimitKey::new("user:1");

        for expected in (0..5).rev() {
            let decision = limiter.check(&key, policy(5, 60), None).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
            assert_eq!(decision.retry_after, 0);
            assert_eq!(decision.reset_time, T0 + 60);
        }
    }

    #[tokio::test]
    async fn test_request_past_limit_is_denied() {
        let (limiter, _) = limiter();
        let key = RateLimitKey::new("user:1");

        for i in 0..5 {
            let identifier = format!("t{}", i);
            assert!(limiter.check(&key, policy(5, 60), Some(&identifier)).await.unwrap().allowed);
        }

        let decision = limiter.check(&key, policy(5, 60), Some("t5")).await.unwrap();
        assert_eq!(
            decision,
            RateDecision {
                allowed: false,
                remaining: 0,
                reset_time: T0 + 60,
                retry_after: 60,
                limit: 5,
                window: 60,
                identifier: Some("t5".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_window_expiry_restores_quota() {
        let (limiter, clock) = limiter();
        let key = RateLimitKey::new("user:1");

        for _ in 0..6 {
            limiter.check(&key, policy(5, 60), None).await.unwrap();
        }

        clock.advance(60);
        let decision = limiter.check(&key, policy(5, 60), None).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_retry_after_tracks_oldest_entry() {
        let (limiter, clock) = limiter();
        let key = RateLimitKey::new("ip:10.0.0.1");

        limiter.check(&key, policy(2, 60), None).await.unwrap();
        clock.advance(20);
        limiter.check(&key, policy(2, 60), None).await.unwrap();
        clock.advance(10);

        let decision = limiter.check(&key, policy(2, 60), None).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reset_time, T0 + 60);
        assert_eq!(decision.retry_after, 30);
    }

    #[tokio::test]
    async fn test_denied_requests_still_count() {
        let (limiter, clock) = limiter();
        let key = RateLimitKey::new("user:1");

        limiter.check(&key, policy(1, 60), None).await.unwrap();
        clock.advance(30);
        // Denied, but recorded at T0 + 30
        assert!(!limiter.check(&key, policy(1, 60), None).await.unwrap().allowed);

        // The first entry has aged out; the denied one has not
        clock.advance(30);
        let decision = limiter.check(&key, policy(1, 60), None).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reset_time, T0 + 90);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (limiter, _) = limiter();

        for _ in 0..5 {
            limiter.check(&RateLimitKey::new("user:1"), policy(5, 60), None).await.unwrap();
        }

        let decision = limiter.check(&RateLimitKey::new("user:2"), policy(5, 60), None).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let limiter = SlidingWindowLimiter::with_clock(Arc::new(UnavailableStore), Arc::new(MockClock::new(T0)));

        let result = limiter.check(&RateLimitKey::new("user:1"), policy(5, 60), None).await;
        assert!(matches!(result, Err(ref e) if e.is_store_failure()));
    }

    #[tokio::test]
    async fn test_bucketed_keys() {
        let clock = MockClock::new(T0);
        let store = Arc::new(MemoryWindowStore::new("rate_limit:", Arc::new(clock.clone())));
        let limiter = SlidingWindowLimiter::with_clock(store.clone(), Arc::new(clock.clone())).bucketed(true);

        limiter.check(&RateLimitKey::new("user:1"), policy(5, 60), None).await.unwrap();

        let bucket = (T0 - 60) / 60;
        let statuses = store.enumerate("*").await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].key, format!("rate_limit:user:1:{}", bucket));
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_exceed_limit() {
        let (limiter, _) = limiter();
        let limiter = Arc::new(limiter);
        let key = RateLimitKey::new("user:1");

        let checks = (0..50).map(|_| {
            let limiter = limiter.clone();
            let key = key.clone();
            tokio::spawn(async move { limiter.check(&key, policy(10, 60), None).await.unwrap() })
        });

        let decisions = futures::future::join_all(checks).await;
        let allowed = decisions.into_iter().filter(|d| d.as_ref().unwrap().allowed).count();
        assert_eq!(allowed, 10);
    }
}
