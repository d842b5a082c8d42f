//! End-to-end behaviour of the limiter, throttle and response rendering
//! against the in-memory store.

use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;

use noti_ratelimit::config::{FailurePolicy, NotiConfig, RateLimitingConfig};
use noti_ratelimit::error::{NotiError, Result};
use noti_ratelimit::protocol::{admit, ClearSelector, RateLimitAdmin};
use noti_ratelimit::ratelimit::{
    KeyStatus, MemoryWindowStore, MockClock, RateLimitKey, RateLimitPolicy, RequestIdentity, Scope, ScopePolicies,
    SlidingWindowLimiter, Throttle, WindowSnapshot, WindowStore,
};
use noti_ratelimit::service::RateLimitService;

const T0: i64 = 1_700_000_000;

fn limiter_at(start: i64) -> (Arc<SlidingWindowLimiter>, MockClock) {
    let clock = MockClock::new(start);
    let store = Arc::new(MemoryWindowStore::new("rate_limit:", Arc::new(clock.clone())));
    let limiter = SlidingWindowLimiter::with_clock(store, Arc::new(clock.clone()));
    (Arc::new(limiter), clock)
}

fn policy(limit: u64, window: u64) -> RateLimitPolicy {
    RateLimitPolicy::new(limit, window).unwrap()
}

/// Store that is always down.
struct DownStore;

#[async_trait]
impl WindowStore for DownStore {
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
async fn burst_in_one_second_allows_limit_then_denies() {
    let (limiter, _) = limiter_at(T0);
    let key = RateLimitKey::new("user:1");

    let mut remaining = Vec::new();
    for i in 0..5 {
        let identifier = format!("t0+{}", i);
        let decision = limiter.check(&key, policy(5, 60), Some(&identifier)).await.unwrap();
        assert!(decision.allowed, "request {} should be allowed", i + 1);
        remaining.push(decision.remaining);
    }
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

    let sixth = limiter.check(&key, policy(5, 60), Some("t0+5")).await.unwrap();
    assert!(!sixth.allowed);
    assert_eq!(sixth.remaining, 0);
    assert_eq!(sixth.retry_after, 60);
    assert_eq!(sixth.reset_time, T0 + 60);
}

#[tokio::test]
async fn exhausted_key_does_not_affect_another() {
    let (limiter, _) = limiter_at(T0);

    for _ in 0..5 {
        limiter.check(&RateLimitKey::new("user:1"), policy(5, 60), None).await.unwrap();
    }
    let other = limiter.check(&RateLimitKey::new("user:2"), policy(5, 60), None).await.unwrap();

    assert!(other.allowed);
    assert_eq!(other.remaining, 4);
}

#[tokio::test]
async fn quota_returns_after_window() {
    let (limiter, clock) = limiter_at(T0);
    let key = RateLimitKey::new("ip:192.0.2.1");

    for _ in 0..4 {
        limiter.check(&key, policy(3, 60), None).await.unwrap();
    }
    clock.advance(61);

    let decision = limiter.check(&key, policy(3, 60), None).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 2);
}

#[tokio::test]
async fn denied_requests_keep_pressure() {
    let (limiter, clock) = limiter_at(T0);
    let key = RateLimitKey::new("user:1");

    limiter.check(&key, policy(2, 60), None).await.unwrap();
    limiter.check(&key, policy(2, 60), None).await.unwrap();

    let mut previous = 0;
    for _ in 0..3 {
        clock.advance(5);
        let decision = limiter.check(&key, policy(2, 60), None).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.retry_after > 0);
        assert!(decision.reset_time >= previous);
        previous = decision.reset_time;
    }

    // The first two entries are gone at T0 + 60, the denied ones are not
    clock.set(T0 + 60);
    assert!(!limiter.check(&key, policy(2, 60), None).await.unwrap().allowed);
}

#[tokio::test]
async fn clearing_unknown_key_is_a_noop() {
    let (limiter, _) = limiter_at(T0);
    let admin = RateLimitAdmin::new(limiter);

    let outcomes = admin
        .clear(&ClearSelector {
            key: Some("user:does-not-exist".to_string()),
            ..ClearSelector::default()
        })
        .await;

    assert!(outcomes.iter().all(|o| o.success));
}

#[tokio::test]
async fn unavailable_store_never_yields_a_decision() {
    let limiter = SlidingWindowLimiter::with_clock(Arc::new(DownStore), Arc::new(MockClock::new(T0)));

    let result = limiter.check(&RateLimitKey::new("user:1"), policy(5, 60), None).await;
    match result {
        Err(e) => assert!(e.is_store_failure()),
        Ok(decision) => panic!("expected a store failure, got {:?}", decision),
    }
}

#[tokio::test]
async fn fail_closed_renders_service_unavailable() {
    let limiter = Arc::new(SlidingWindowLimiter::with_clock(Arc::new(DownStore), Arc::new(MockClock::new(T0))));
    let policies = ScopePolicies::from_config(&RateLimitingConfig::default()).unwrap();
    let throttle = Throttle::new(limiter, policies, FailurePolicy::FailClosed);
    let identity = RequestIdentity::anonymous("192.0.2.10".parse().unwrap(), "GET", "/api/notifications/");

    let response = admit(&throttle, Scope::Anonymous, &identity).await.unwrap_err();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
    assert_eq!(body["error"]["code"], "service_unavailable");
    assert!(body["error"].get("details").is_none());
}

#[tokio::test]
async fn debug_mode_exposes_store_failure_details() {
    let limiter = Arc::new(SlidingWindowLimiter::with_clock(Arc::new(DownStore), Arc::new(MockClock::new(T0))));
    let policies = ScopePolicies::from_config(&RateLimitingConfig::default()).unwrap();
    let throttle = Throttle::new(limiter, policies, FailurePolicy::FailClosed).with_debug_errors(true);
    let identity = RequestIdentity::anonymous("192.0.2.10".parse().unwrap(), "GET", "/api/notifications/");

    let response = admit(&throttle, Scope::Anonymous, &identity).await.unwrap_err();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
    let details = body["error"]["details"].as_str().unwrap();
    assert!(details.contains("connection refused"), "unexpected details: {}", details);
}

#[tokio::test]
async fn fail_open_admits_without_decision() {
    let limiter = Arc::new(SlidingWindowLimiter::with_clock(Arc::new(DownStore), Arc::new(MockClock::new(T0))));
    let policies = ScopePolicies::from_config(&RateLimitingConfig::default()).unwrap();
    let throttle = Throttle::new(limiter, policies, FailurePolicy::FailOpen);
    let identity = RequestIdentity::anonymous("192.0.2.10".parse().unwrap(), "GET", "/api/notifications/");

    assert_eq!(admit(&throttle, Scope::Anonymous, &identity).await.unwrap(), None);
}

#[tokio::test]
async fn unknown_period_fails_at_startup() {
    let mut config = NotiConfig::default();
    config.store.backend = noti_ratelimit::config::StoreBackend::Memory;
    config.rate_limiting.anon_rate = "100/fortnight".to_string();

    let result = RateLimitService::from_config(&config).await;
    assert!(matches!(result, Err(NotiError::Config(_))));
}

#[tokio::test]
async fn endpoint_budgets_are_per_route() {
    let (limiter, _) = limiter_at(T0);
    let policies = ScopePolicies::from_config(&RateLimitingConfig::default())
        .unwrap()
        .with_policy(Scope::Endpoint, policy(1, 60));
    let throttle = Throttle::new(limiter, policies, FailurePolicy::FailClosed);
    let ip = "192.0.2.20".parse().unwrap();

    let list = RequestIdentity::authenticated(5, "erin", ip, "GET", "/api/notifications/");
    let create = RequestIdentity::authenticated(5, "erin", ip, "POST", "/api/notifications/");

    assert!(admit(&throttle, Scope::Endpoint, &list).await.is_ok());
    assert!(admit(&throttle, Scope::Endpoint, &create).await.is_ok());
    let denied = admit(&throttle, Scope::Endpoint, &list).await.unwrap_err();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
}
