//! Request-level throttling: key derivation, limiting and the store-failure
//! policy in one place.

use std::sync::Arc;
use tracing::{error, warn};

use super::key::{RequestIdentity, Scope};
use super::limiter::{RateDecision, SlidingWindowLimiter};
use super::policy::ScopePolicies;
use crate::config::FailurePolicy;
use crate::error::Result;

/// Result of throttling one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleVerdict {
    /// The limiter made a decision, which may be a denial.
    Decided(RateDecision),
    /// The store was unavailable and the failure policy let the request
    /// through without metering it.
    Bypassed,
}

impl ThrottleVerdict {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        match self {
            ThrottleVerdict::Decided(decision) => decision.allowed,
            ThrottleVerdict::Bypassed => true,
        }
    }

    pub fn decision(&self) -> Option<&RateDecision> {
        match self {
            ThrottleVerdict::Decided(decision) => Some(decision),
            ThrottleVerdict::Bypassed => None,
        }
    }
}

/// Throttle shared by all request handlers of a process.
pub struct Throttle {
    limiter: Arc<SlidingWindowLimiter>,
    policies: ScopePolicies,
    failure_policy: FailurePolicy,
    /// Expose internal error details in rendered responses
    debug_errors: bool,
}

impl Throttle {
    pub fn new(limiter: Arc<SlidingWindowLimiter>, policies: ScopePolicies, failure_policy: FailurePolicy) -> Self {
        Self {
            limiter,
            policies,
            failure_policy,
            debug_errors: false,
        }
    }

    pub fn with_debug_errors(mut self, enabled: bool) -> Self {
        self.debug_errors = enabled;
        self
    }

    pub fn debug_errors(&self) -> bool {
        self.debug_errors
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    pub fn policies(&self) -> &ScopePolicies {
        &self.policies
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Check `identity` against the budget of `scope`.
    ///
    /// With `FailurePolicy::FailClosed` a store failure is returned as an
    /// error; with `FailurePolicy::FailOpen` it becomes
    /// `ThrottleVerdict::Bypassed`.
    pub async fn check(&self, scope: Scope, identity: &RequestIdentity) -> Result<ThrottleVerdict> {
        let (key, policy) = self.policies.resolve(scope, identity);

        match self.limiter.check(&key, policy, Some(identity.identifier())).await {
            Ok(decision) => Ok(ThrottleVerdict::Decided(decision)),
            Err(e) if e.is_store_failure() => match self.failure_policy {
                FailurePolicy::FailOpen => {
                    warn!(scope = %scope, key = %key, error = %e, "Rate limit store unavailable, failing open");
                    Ok(ThrottleVerdict::Bypassed)
                }
                FailurePolicy::FailClosed => {
                    error!(scope = %scope, key = %key, error = %e, "Rate limit store unavailable, failing closed");
                    Err(e)
                }
            },
            Err(e) => Err(e),
        }
    }

    /// Check `identity` against its default scope.
    pub async fn check_default(&self, identity: &RequestIdentity) -> Result<ThrottleVerdict> {
        self.check(Scope::default_for(identity), identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitingConfig;
    use crate::error::NotiError;
    use crate::ratelimit::clock::MockClock;
    use crate::ratelimit::memory::MemoryWindowStore;
    use crate::ratelimit::rate::RateLimitPolicy;
    use crate::ratelimit::store::{KeyStatus, WindowSnapshot, WindowStore};
    use async_trait::async_trait;
    use std::net::IpAddr;

    struct TimingOutStore;

    #[async_trait]
    impl WindowStore for TimingOutStore {
        async fn record_and_count(&self, _key: &str, _now: i64, _window_secs: u64) -> Result<WindowSnapshot> {
            Err(NotiError::StoreTimeout(std::time::Duration::from_millis(250)))
        }

        async fn clear(&self, _pattern: &str) -> Result<usize> {
            Ok(0)
        }

        async fn enumerate(&self, _pattern: &str) -> Result<Vec<KeyStatus>> {
            Ok(Vec::new())
        }

        async fn remove(&self, _keys: &[String]) -> Result<usize> {
            Ok(0)
        }
    }

    fn policies() -> ScopePolicies {
        ScopePolicies::from_config(&RateLimitingConfig::default())
            .unwrap()
            .with_policy(Scope::Notification, RateLimitPolicy::new(2, 3600).unwrap())
    }

    fn identity() -> RequestIdentity {
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        RequestIdentity::authenticated(3, "carol", ip, "POST", "/api/notifications/send/")
    }

    fn memory_throttle() -> Throttle {
        let clock = Arc::new(MockClock::new(1_700_000_000));
        let store = Arc::new(MemoryWindowStore::new("rate_limit:", clock.clone()));
        let limiter = Arc::new(SlidingWindowLimiter::with_clock(store, clock));
        Throttle::new(limiter, policies(), FailurePolicy::FailClosed)
    }

    #[tokio::test]
    async fn test_scopes_have_independent_budgets() {
        let throttle = memory_throttle();
        let identity = identity();

        for _ in 0..3 {
            throttle.check(Scope::Notification, &identity).await.unwrap();
        }
        let exhausted = throttle.check(Scope::Notification, &identity).await.unwrap();
        assert!(!exhausted.is_allowed());

        let user = throttle.check_default(&identity).await.unwrap();
        assert!(user.is_allowed());
        assert_eq!(user.decision().unwrap().remaining, 999);
        assert_eq!(user.decision().unwrap().identifier.as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn test_fail_closed_surfaces_error() {
        let limiter = Arc::new(SlidingWindowLimiter::new(Arc::new(TimingOutStore)));
        let throttle = Throttle::new(limiter, policies(), FailurePolicy::FailClosed);

        let err = throttle.check(Scope::User, &identity()).await.unwrap_err();
        assert!(err.is_store_failure());
    }

    #[tokio::test]
    async fn test_fail_open_bypasses() {
        let limiter = Arc::new(SlidingWindowLimiter::new(Arc::new(TimingOutStore)));
        let throttle = Throttle::new(limiter, policies(), FailurePolicy::FailOpen);

        let verdict = throttle.check(Scope::User, &identity()).await.unwrap();
        assert_eq!(verdict, ThrottleVerdict::Bypassed);
        assert!(verdict.is_allowed());
        assert!(verdict.decision().is_none());
    }
}
