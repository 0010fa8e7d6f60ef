//! Fixed-window request counter keyed by an arbitrary string.
//!
//! # Algorithm
//!
//! Each key owns a [`RateLimitEntry`] holding a count and the instant its
//! window ends. The first observation of a key (or the first after its window
//! ended) starts a new window with `count = 1`. Every later observation inside
//! the window increments the count, and the key is limited once the count
//! exceeds `max_requests`. So at most `max_requests` calls per window report
//! "not limited".
//!
//! # Concurrency
//!
//! The table is a `DashMap`; check-then-increment for a key runs while that
//! key's shard is write-locked, so concurrent requests for one key cannot both
//! observe the same count.
//!
//! # Memory
//!
//! Entries are created lazily and never removed on the request path. Call
//! [`RateLimiter::sweep_expired`] periodically (the app state does) to drop
//! keys whose window has ended.
//!
//! The pipeline uses the result only to quiet request logging for noisy bots;
//! it never rejects a request.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::trace;

/// Counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests observed in the current window.
    pub count: u32,
    /// Instant the current window ends.
    pub reset_at: Instant,
}

/// Process-wide fixed-window limiter, shared by `Arc` from the app state.
#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request for `key` and report whether the key is over budget.
    pub fn is_rate_limited(&self, key: &str, max_requests: u32, window: Duration) -> bool {
        self.is_rate_limited_at(key, max_requests, window, Instant::now())
    }

    /// [`is_rate_limited`](Self::is_rate_limited) against an explicit clock reading.
    pub fn is_rate_limited_at(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: Instant,
    ) -> bool {
        let reset_at = now.checked_add(window).unwrap_or(now);

        if let Some(mut entry) = self.entries.get_mut(key) {
            if now > entry.reset_at {
                *entry = RateLimitEntry { count: 1, reset_at };
                trace!(key, "Rate limit window reset");
                return false;
            }

            entry.count = entry.count.saturating_add(1);
            return entry.count > max_requests;
        }

        // First sighting. `entry` re-checks under the shard lock in case a
        // concurrent request inserted the key after `get_mut` missed.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(RateLimitEntry { count: 0, reset_at });

        if entry.count == 0 || now > entry.reset_at {
            *entry = RateLimitEntry { count: 1, reset_at };
            return false;
        }

        entry.count = entry.count.saturating_add(1);
        entry.count > max_requests
    }

    /// Remove every entry whose window ended before `now`.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now <= entry.reset_at);
        before.saturating_sub(self.entries.len())
    }

    /// Current state for `key`, if it has been seen.
    pub fn entry(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rate-limit key for a caller on a route: `"<ip hash>:<route>"`.
pub fn rate_limit_key(ip_hash: &str, route: &str) -> String {
    format!("{ip_hash}:{route}")
}
