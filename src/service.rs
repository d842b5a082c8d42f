//! Process-wide wiring of the rate limiting components.
//!
//! Built once at startup from `NotiConfig` and handed to request handlers;
//! owns the single store connection of the process.

use std::sync::Arc;
use tracing::info;

use crate::config::{NotiConfig, StoreBackend};
use crate::error::Result;
use crate::protocol::RateLimitAdmin;
use crate::ratelimit::{
    Clock, MemoryWindowStore, RedisWindowStore, ScopePolicies, SlidingWindowLimiter, SystemClock, Throttle,
    WindowStore,
};

/// The rate limiting core, assembled.
pub struct RateLimitService {
    throttle: Arc<Throttle>,
    admin: RateLimitAdmin,
}

impl RateLimitService {
    /// Validate the configured rates and connect to the configured store.
    pub async fn from_config(config: &NotiConfig) -> Result<Self> {
        // Rates first, so a bad rate string fails before any connection attempt
        let policies = ScopePolicies::from_config(&config.rate_limiting)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let store: Arc<dyn WindowStore> = match config.store.backend {
            StoreBackend::Redis => Arc::new(RedisWindowStore::connect(&config.store).await?),
            StoreBackend::Memory => Arc::new(MemoryWindowStore::new(config.store.key_prefix.clone(), clock.clone())),
        };

        info!(
            backend = ?config.store.backend,
            failure_policy = ?config.rate_limiting.failure_policy,
            bucketed_keys = config.rate_limiting.bucketed_keys,
            "Rate limiting service initialized"
        );

        Ok(Self::assemble(store, clock, policies, config))
    }

    /// Assemble the service around an existing store.
    pub fn with_store(
        store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
        config: &NotiConfig,
    ) -> Result<Self> {
        let policies = ScopePolicies::from_config(&config.rate_limiting)?;
        Ok(Self::assemble(store, clock, policies, config))
    }

    fn assemble(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>, policies: ScopePolicies, config: &NotiConfig) -> Self {
        let limiter = Arc::new(
            SlidingWindowLimiter::with_clock(store, clock).bucketed(config.rate_limiting.bucketed_keys),
        );
        let throttle = Arc::new(
            Throttle::new(limiter.clone(), policies, config.rate_limiting.failure_policy).with_debug_errors(config.debug),
        );

        Self {
            throttle,
            admin: RateLimitAdmin::new(limiter),
        }
    }

    /// Shared throttle for request handlers.
    pub fn throttle(&self) -> Arc<Throttle> {
        self.throttle.clone()
    }

    pub fn admin(&self) -> &RateLimitAdmin {
        &self.admin
    }
}
