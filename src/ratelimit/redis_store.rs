//! Redis-backed window store.
//!
//! Each rate limit key is a sorted set whose scores are request timestamps.
//! The trim/count/insert/expire sequence runs as one Lua script, so
//! concurrent callers on the same key never observe a half-updated window.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Script};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::store::{escape_glob, KeyStatus, WindowSnapshot, WindowStore};
use crate::config::StoreConfig;
use crate::error::{NotiError, Result};

/// KEYS[1] = window key; ARGV = now, window seconds, unique member.
/// Returns `{count_before, oldest}` where `oldest` is -1 for an empty window.
const RECORD_AND_COUNT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
redis.call('ZADD', key, now, ARGV[3])
redis.call('EXPIRE', key, window)

if oldest[2] then
    return {count, tonumber(oldest[2])}
end
return {count, -1}
"#;

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 200;

/// A `WindowStore` backed by Redis sorted sets.
///
/// Cloning is cheap; clones share the underlying connection manager.
#[derive(Clone)]
pub struct RedisWindowStore {
    connection: ConnectionManager,
    script: Script,
    key_prefix: String,
    timeout: Duration,
}

impl fmt::Debug for RedisWindowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisWindowStore")
            .field("key_prefix", &self.key_prefix)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisWindowStore {
    /// Connect to the Redis instance named in `config`.
    ///
    /// The initial connection is bounded by the configured timeout, like
    /// every later call.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let timeout = config.timeout();
        let client = Client::open(config.redis_url.as_str())?;

        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| NotiError::StoreTimeout(timeout))?
            .map_err(|e| NotiError::StoreUnavailable(e.to_string()))?;

        info!(url = %config.redis_url, prefix = %config.key_prefix, "Connected to Redis window store");

        Ok(Self {
            connection,
            script: Script::new(RECORD_AND_COUNT_SCRIPT),
            key_prefix: config.key_prefix.clone(),
            timeout,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn pattern(&self, pattern: &str) -> String {
        format!("{}{}", escape_glob(&self.key_prefix), pattern)
    }

    /// Run a Redis call under the store timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(timeout = ?self.timeout, "Redis call timed out");
                Err(NotiError::StoreTimeout(self.timeout))
            }
        }
    }

    /// Collect every key matching a full (already prefixed) pattern.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) = self.bounded(cmd.query_async(&mut conn)).await?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn record_and_count(&self, key: &str, now: i64, window_secs: u64) -> Result<WindowSnapshot> {
        let key = self.key(key);
        let member = format!("{}:{}", now, Uuid::new_v4());
        let mut conn = self.connection.clone();

        let mut invocation = self.script.prepare_invoke();
        invocation.key(&key).arg(now).arg(window_secs).arg(&member);
        let (count_before, oldest): (u64, i64) = self.bounded(invocation.invoke_async(&mut conn)).await?;

        trace!(key = %key, count = count_before, "Recorded request in Redis window");

        Ok(WindowSnapshot {
            count_before,
            oldest: (oldest >= 0).then_some(oldest),
        })
    }

    async fn clear(&self, pattern: &str) -> Result<usize> {
        let keys = self.scan(&self.pattern(pattern)).await?;
        let removed = self.remove(&keys).await?;

        debug!(pattern = %pattern, removed = removed, "Cleared rate limit keys");
        Ok(removed)
    }

    async fn remove(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        let removed: usize = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(removed)
    }

    async fn enumerate(&self, pattern: &str) -> Result<Vec<KeyStatus>> {
        let keys = self.scan(&self.pattern(pattern)).await?;
        let mut conn = self.connection.clone();
        let mut statuses = Vec::with_capacity(keys.len());

        for key in keys {
            let mut pipe = redis::pipe();
            pipe.cmd("TTL").arg(&key).cmd("ZCARD").arg(&key);
            let (ttl, count): (i64, u64) = self.bounded(pipe.query_async(&mut conn)).await?;

            // -2: expired between SCAN and TTL
            if ttl == -2 {
                continue;
            }
            statuses.push(KeyStatus { key, count, ttl });
        }

        Ok(statuses)
    }
}
