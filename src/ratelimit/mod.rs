//! Sliding-window rate limiting and the stores that back it.

mod clock;
mod key;
mod limiter;
mod memory;
mod policy;
mod rate;
mod redis_store;
mod store;
mod throttle;

pub use clock::{Clock, MockClock, SystemClock};
pub use key::{ip_key, user_key, AuthenticatedUser, RateLimitKey, RequestIdentity, Scope};
pub use limiter::{RateDecision, SlidingWindowLimiter};
pub use memory::MemoryWindowStore;
pub use policy::ScopePolicies;
pub use rate::{Period, RateLimitPolicy};
pub use redis_store::RedisWindowStore;
pub use store::{escape_glob, KeyStatus, WindowSnapshot, WindowStore};
pub use throttle::{Throttle, ThrottleVerdict};
