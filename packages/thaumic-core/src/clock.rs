//! Wall-clock time source for the realtime protocol.
//!
//! Every outbound message carries a `serverTime` taken from a single call to
//! [`now_ms`], and the sync controller derives `scheduledAt` from it. Kept as
//! a trait so tests can inject a fixed or stepped clock instead of the
//! system clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol_constants::START_DELAY_MS;

/// Source of the current wall-clock instant, in milliseconds since the Unix
/// epoch.
pub trait Clock: Send + Sync {
    /// Returns the current time in integer milliseconds.
    fn now_ms(&self) -> u64;

    /// Returns a scheduled-start instant `buffer_ms` in the future.
    fn scheduled_at(&self, buffer_ms: u64) -> u64 {
        self.now_ms() + buffer_ms
    }

    /// Returns the scheduled-start instant using the protocol's default
    /// propagation buffer.
    fn default_scheduled_at(&self) -> u64 {
        self.scheduled_at(START_DELAY_MS)
    }
}

/// Clock backed by the operating system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Returns the current Unix timestamp in milliseconds using the system
/// clock directly, for call sites that do not carry a `Clock` handle.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen
/// in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemClock.now_ms()
}

/// Clock that returns a fixed instant, advanced explicitly by tests.
///
/// Useful for deterministic assertions on `scheduledAt` and drift math
/// without racing the real clock.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicU64,
}

impl FixedClock {
    /// Creates a clock pinned at `start_ms`.
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_ms),
        }
    }

    /// Advances the clock by `delta_ms` and returns the new value.
    pub fn advance(&self, delta_ms: u64) -> u64 {
        self.millis.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }

    /// Sets the clock to an absolute value.
    pub fn set(&self, ms: u64) {
        self.millis.store(ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
