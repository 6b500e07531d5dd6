//! Sliding-window rate limiting (§3 Rate-limit store, §4.4, §4.7).
//!
//! Two shapes are used across the core:
//! - [`SlidingWindowCounter`]: a single counter scoped to one connection
//!   (ping / message / combined caps, §4.4). Cheap, no key, no eviction.
//! - [`KeyedSlidingWindow`]: a bounded per-key store (the IP-keyed join
//!   limiter, §4.7). When the key population exceeds its cap, the 10% of
//!   keys with the oldest most-recent activity are evicted (§3); a
//!   background sweep additionally prunes fully-elapsed entries so idle
//!   keys don't linger between join attempts.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Single-key sliding-window counter, scoped to one connection.
///
/// Timestamps are milliseconds from whatever clock the caller supplies
/// (normally [`crate::clock::now_millis`]); `admit` evicts everything
/// older than `window_ms` before checking the cap, so the window always
/// reflects "now minus window" rather than a fixed bucket.
pub struct SlidingWindowCounter {
    timestamps: Mutex<VecDeque<u64>>,
    cap: u32,
    window_ms: u64,
}

impl SlidingWindowCounter {
    #[must_use]
    pub fn new(cap: u32, window_ms: u64) -> Self {
        Self {
            timestamps: Mutex::new(VecDeque::new()),
            cap,
            window_ms,
        }
    }

    /// Records an attempt at `now_ms` and returns `true` if it is admitted
    /// (the window held fewer than `cap` entries before this one).
    pub fn admit(&self, now_ms: u64) -> bool {
        let mut timestamps = self.timestamps.lock();
        let floor = now_ms.saturating_sub(self.window_ms);
        while timestamps.front().is_some_and(|&t| t < floor) {
            timestamps.pop_front();
        }
        if timestamps.len() as u32 >= self.cap {
            return false;
        }
        timestamps.push_back(now_ms);
        true
    }
}

/// Bounded per-key sliding-window store, e.g. the IP-keyed join limiter
/// (§4.7) or a per-client `statusReport`/`forceResync` cadence tracker.
///
/// Each key owns its own [`SlidingWindowCounter`]. `total_entries` is kept
/// under `max_entries` by evicting the 10% of keys with the oldest
/// most-recent-activity timestamp whenever an insert would exceed the cap.
pub struct KeyedSlidingWindow {
    entries: DashMap<String, Arc<KeyedEntry>>,
    cap: u32,
    window_ms: u64,
    max_entries: usize,
}

struct KeyedEntry {
    counter: SlidingWindowCounter,
    last_seen_ms: std::sync::atomic::AtomicU64,
}

impl KeyedSlidingWindow {
    #[must_use]
    pub fn new(cap: u32, window_ms: u64, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            cap,
            window_ms,
            max_entries,
        }
    }

    /// Admits one attempt for `key` at `now_ms`, evicting stale keys first
    /// if the store is at capacity.
    pub fn admit(&self, key: &str, now_ms: u64) -> bool {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(key) {
            self.evict_oldest_tenth();
        }
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(KeyedEntry {
                    counter: SlidingWindowCounter::new(self.cap, self.window_ms),
                    last_seen_ms: std::sync::atomic::AtomicU64::new(now_ms),
                })
            })
            .clone();
        entry
            .last_seen_ms
            .store(now_ms, std::sync::atomic::Ordering::SeqCst);
        entry.counter.admit(now_ms)
    }

    fn evict_oldest_tenth(&self) {
        let mut by_age: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    e.value().last_seen_ms.load(std::sync::atomic::Ordering::SeqCst),
                )
            })
            .collect();
        by_age.sort_by_key(|(_, last_seen)| *last_seen);
        let evict_count = (by_age.len() / 10).max(1);
        for (key, _) in by_age.into_iter().take(evict_count) {
            self.entries.remove(&key);
        }
    }

    /// Prunes every key whose window has fully elapsed as of `now_ms`,
    /// independent of the eviction-on-insert path. Run on a background
    /// timer so a store that stops receiving a given key's traffic doesn't
    /// linger until the next insert happens to trigger eviction.
    pub fn sweep_expired(&self, now_ms: u64) {
        let floor = now_ms.saturating_sub(self.window_ms);
        self.entries.retain(|_, entry| {
            entry.last_seen_ms.load(std::sync::atomic::Ordering::SeqCst) >= floor
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
