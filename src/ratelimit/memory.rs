//! In-process window store.
//!
//! Each key's window lives in a `DashMap` entry; holding the entry guard for
//! the whole trim/count/insert/expire sequence makes it atomic per key.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::clock::Clock;
use super::store::{escape_glob, KeyStatus, WindowSnapshot, WindowStore};
use crate::error::Result;

/// Seconds between sweeps of expired windows on the request path.
const SWEEP_INTERVAL_SECS: i64 = 60;

#[derive(Debug, Default)]
struct Window {
    entries: Vec<i64>,
    expires_at: i64,
}

/// A `WindowStore` kept in local memory.
///
/// Suitable for tests and single-process deployments; state is not shared
/// between processes.
pub struct MemoryWindowStore {
    windows: DashMap<String, Window>,
    key_prefix: String,
    /// Used to expire keys when listing
    clock: Arc<dyn Clock>,
    /// Epoch second at or after which the next request sweeps expired windows
    next_sweep: AtomicI64,
}

impl MemoryWindowStore {
    pub fn new(key_prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            key_prefix: key_prefix.into(),
            clock,
            next_sweep: AtomicI64::new(i64::MIN),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn pattern(&self, pattern: &str) -> String {
        format!("{}{}", escape_glob(&self.key_prefix), pattern)
    }

    fn purge_expired(&self, now: i64) {
        self.windows.retain(|_, window| window.expires_at > now);
    }

    /// Evict abandoned windows at most once per `SWEEP_INTERVAL_SECS`.
    /// Must not be called while holding a map guard.
    fn maybe_sweep(&self, now: i64) {
        let due = self.next_sweep.load(Ordering::Relaxed);
        if now < due {
            return;
        }
        // Only the caller that moves the deadline sweeps
        if self
            .next_sweep
            .compare_exchange(due, now.saturating_add(SWEEP_INTERVAL_SECS), Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let before = self.windows.len();
        self.purge_expired(now);
        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted expired memory windows");
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.purge_expired(self.clock.now());
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn record_and_count(&self, key: &str, now: i64, window_secs: u64) -> Result<WindowSnapshot> {
        let window_secs = window_secs as i64;
        let cutoff = now - window_secs;

        self.maybe_sweep(now);

        let snapshot = {
            let mut window = self.windows.entry(self.key(key)).or_default();
            if window.expires_at <= now {
                window.entries.clear();
            }

            window.entries.retain(|&ts| ts > cutoff);
            let snapshot = WindowSnapshot {
                count_before: window.entries.len() as u64,
                oldest: window.entries.iter().copied().min(),
            };
            window.entries.push(now);
            window.expires_at = now + window_secs;
            snapshot
        };

        trace!(key = %key, count = snapshot.count_before, "Recorded request in memory window");
        Ok(snapshot)
    }

    async fn clear(&self, pattern: &str) -> Result<usize> {
        let pattern = self.pattern(pattern);
        let matching: Vec<String> = self
            .windows
            .iter()
            .filter(|entry| glob_match(&pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        Ok(matching
            .iter()
            .filter(|key| self.windows.remove(*key).is_some())
            .count())
    }

    async fn remove(&self, keys: &[String]) -> Result<usize> {
        Ok(keys.iter().filter(|key| self.windows.remove(*key).is_some()).count())
    }

    async fn enumerate(&self, pattern: &str) -> Result<Vec<KeyStatus>> {
        let now = self.clock.now();
        self.purge_expired(now);

        let pattern = self.pattern(pattern);
        let mut statuses: Vec<KeyStatus> = self
            .windows
            .iter()
            .filter(|entry| glob_match(&pattern, entry.key()))
            .map(|entry| KeyStatus {
                key: entry.key().clone(),
                count: entry.value().entries.len() as u64,
                ttl: entry.value().expires_at - now,
            })
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(statuses)
    }
}

/// Match `text` against a glob supporting `*`, `?` and `\` escapes.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position after the last `*` seen, and the text index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                p += 1;
                backtrack = Some((p, t));
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                p += 2;
                t += 1;
                continue;
            }
            Some(&c) if c != '\\' && c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
