//! Rate strings and the `(limit, window)` policy they describe.

use serde::Serialize;
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{NotiError, Result};

/// Period names accepted in rate strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl Period {
    /// Length of this period in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            Period::Second => 1,
            Period::Minute => 60,
            Period::Hour => 3600,
            Period::Day => 86400,
            Period::Week => 604800,
        }
    }

    /// Get the duration of this period.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }
}

impl FromStr for Period {
    type Err = NotiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "second" => Ok(Period::Second),
            "minute" => Ok(Period::Minute),
            "hour" => Ok(Period::Hour),
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            other => Err(NotiError::Config(format!("Invalid period: {}", other))),
        }
    }
}

/// A resolved `(limit, window)` pair.
///
/// Both fields are non-zero, so a policy that made it past construction can
/// always be checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RateLimitPolicy {
    limit: NonZeroU64,
    window: NonZeroU64,
}

impl RateLimitPolicy {
    /// Create a policy allowing `limit` requests per `window_secs` seconds.
    pub fn new(limit: u64, window_secs: u64) -> Result<Self> {
        let limit = NonZeroU64::new(limit)
            .ok_or_else(|| NotiError::Config("Rate limit must be at least 1".to_string()))?;
        let window = NonZeroU64::new(window_secs)
            .ok_or_else(|| NotiError::Config("Rate window must be at least 1 second".to_string()))?;
        Ok(Self { limit, window })
    }

    /// Maximum requests per window.
    pub fn limit(&self) -> u64 {
        self.limit.get()
    }

    /// Window length in seconds.
    pub fn window_secs(&self) -> u64 {
        self.window.get()
    }
}

impl FromStr for RateLimitPolicy {
    type Err = NotiError;

    /// Parse `"<count>/<period>"`, e.g. `"100/hour"`.
    fn from_str(rate: &str) -> Result<Self> {
        let (count, period) = rate
            .split_once('/')
            .ok_or_else(|| NotiError::Config(format!("Rate must be in format 'number/period': {}", rate)))?;

        let count: u64 = count
            .trim()
            .parse()
            .map_err(|_| NotiError::Config(format!("Invalid request count in rate: {}", rate)))?;
        let period: Period = period.trim().parse()?;

        Self::new(count, period.seconds())
    }
}

impl fmt::Display for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.limit, self.window)
    }
}
