//! Administrative operations over the rate limit key space.

use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::ratelimit::{
    escape_glob, ip_key, user_key, KeyStatus, RateDecision, RateLimitKey, RateLimitPolicy, SlidingWindowLimiter,
    WindowStore,
};

/// Key used by `RateLimitAdmin::test`.
pub const TEST_KEY: &str = "test:rate_limit";

/// Extra requests `test` is willing to send past the limit.
const TEST_OVERSHOOT: u64 = 5;

/// Which windows `clear` should remove. An empty selector clears everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearSelector {
    pub user: Option<u64>,
    pub ip: Option<IpAddr>,
    pub key: Option<String>,
}

impl ClearSelector {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.ip.is_none() && self.key.is_none()
    }
}

/// Outcome of clearing one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    /// Human-readable target, e.g. `user 42`
    pub target: String,
    pub success: bool,
    pub removed: usize,
}

/// One synthetic request issued by `test`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestProbe {
    pub request: u64,
    pub decision: RateDecision,
}

/// Operator-facing view of the limiter's state.
pub struct RateLimitAdmin {
    limiter: Arc<SlidingWindowLimiter>,
}

impl RateLimitAdmin {
    pub fn new(limiter: Arc<SlidingWindowLimiter>) -> Self {
        Self { limiter }
    }

    fn store(&self) -> &Arc<dyn WindowStore> {
        self.limiter.store()
    }

    /// Every active key with its entry count and remaining TTL.
    pub async fn status(&self) -> Result<Vec<KeyStatus>> {
        self.store().enumerate("*").await
    }

    /// Remove the windows named by `selector`, reporting each target.
    ///
    /// A user or IP target covers the bare actor key, its feature- and
    /// endpoint-scoped variants and their time-bucketed keys. Targets that
    /// match nothing still succeed.
    pub async fn clear(&self, selector: &ClearSelector) -> Vec<ClearOutcome> {
        let mut outcomes = Vec::new();

        if let Some(user) = selector.user {
            outcomes.push(self.clear_owned(format!("user {}", user), &user_key(user), true).await);
        }
        if let Some(ip) = selector.ip {
            outcomes.push(self.clear_owned(format!("IP {}", ip), &ip_key(ip), true).await);
        }
        if let Some(key) = &selector.key {
            outcomes.push(self.clear_owned(format!("key {}", key), key, false).await);
        }
        if selector.is_empty() {
            let target = "all rate limits".to_string();
            let result = self.store().clear("*").await;
            outcomes.push(outcome(target, result));
        }

        outcomes
    }

    async fn clear_owned(&self, target: String, owner: &str, scoped: bool) -> ClearOutcome {
        let result = self.remove_owned(owner, scoped).await;
        outcome(target, result)
    }

    /// Remove `owner`'s window and its bucketed windows; with `scoped`, also
    /// every scope's window whose key ends with `owner`.
    async fn remove_owned(&self, owner: &str, scoped: bool) -> Result<usize> {
        let owner_glob = escape_glob(owner);
        let mut removed = self.store().clear(&owner_glob).await?;
        let mut bucket_patterns = vec![format!("{}:*", owner_glob)];

        if scoped {
            // Keys always end with their actor, so this cannot reach another actor's key
            removed += self.store().clear(&format!("*:{}", owner_glob)).await?;
            bucket_patterns.push(format!("*:{}:*", owner_glob));
        }

        // `*` after the owner also matches path segments of other actors'
        // endpoint keys; only a numeric bucket may follow the owner
        for pattern in bucket_patterns {
            let keys: Vec<String> = self
                .store()
                .enumerate(&pattern)
                .await?
                .into_iter()
                .map(|status| status.key)
                .filter(|key| is_bucket_of(key, owner))
                .collect();
            removed += self.store().remove(&keys).await?;
        }

        Ok(removed)
    }

    /// Drive synthetic requests against `TEST_KEY` until the first denial,
    /// sending at most `limit + 5` (saturating). The test key is cleared before and after.
    pub async fn test(&self, policy: RateLimitPolicy) -> Result<Vec<TestProbe>> {
        let key = RateLimitKey::new(TEST_KEY);
        let selector = ClearSelector {
            key: Some(TEST_KEY.to_string()),
            ..ClearSelector::default()
        };
        self.clear(&selector).await;

        let mut probes = Vec::new();
        for request in 1..=max_test_requests(policy.limit()) {
            let identifier = format!("test_user_{}", request - 1);
            let decision = self.limiter.check(&key, policy, Some(&identifier)).await?;
            let denied = !decision.allowed;
            probes.push(TestProbe { request, decision });
            if denied {
                break;
            }
        }

        self.clear(&selector).await;
        Ok(probes)
    }
}

fn outcome(target: String, result: Result<usize>) -> ClearOutcome {
    match result {
        Ok(removed) => {
            info!(target = %target, removed = removed, "Cleared rate limits");
            ClearOutcome {
                target,
                success: true,
                removed,
            }
        }
        Err(e) => {
            warn!(target = %target, error = %e, "Failed to clear rate limit");
            ClearOutcome {
                target,
                success: false,
                removed: 0,
            }
        }
    }
}

/// Whether `key` is `owner`'s window in a time bucket, `...<owner>:<bucket>`.
fn is_bucket_of(key: &str, owner: &str) -> bool {
    key.rsplit_once(':')
        .map_or(false, |(head, bucket)| bucket.parse::<i64>().is_ok() && head.ends_with(owner))
}

fn max_test_requests(limit: u64) -> u64 {
    limit.saturating_add(TEST_OVERSHOOT)
}
