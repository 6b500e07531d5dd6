//! Per-connection primitives (C4): the unified writer and the per-connection
//! rate limiters.
//!
//! Everything here is deliberately dumb — no room/session knowledge. The
//! dispatcher (`api::ws`) owns the read loop and the session's identity; this
//! module only gives it two things it can't safely build itself: a single
//! write path that serializes concurrent writers, and the sliding-window
//! counters that decide whether an inbound frame is admitted.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;

use crate::channel::{OutboundChannel, SendError};
use crate::config::Config;
use crate::protocol::WsOutgoing;
use crate::ratelimit::SlidingWindowCounter;

/// Production [`OutboundChannel`] wrapping one axum WebSocket's write half.
///
/// The mutex is the `SerialWriter` of §9: whether a write originates from
/// the dispatcher (an application message), the ping loop (a control
/// frame), or the notifier (a broadcast), it goes through the same lock, so
/// the underlying frame writer — which forbids concurrent writes — is never
/// touched from two tasks at once. This holds before and after a connection
/// joins a room, since the same `Arc<WsChannel>` is handed to both the
/// pre-join admission path and the post-join `Participant`.
pub struct WsChannel {
    sender: Mutex<SplitSink<WebSocket, Message>>,
    closed: AtomicBool,
}

impl WsChannel {
    #[must_use]
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sender: Mutex::new(sender),
            closed: AtomicBool::new(false),
        }
    }

    /// Writes a raw WebSocket control/ping frame, serialized through the
    /// same writer lock as application messages.
    pub async fn send_ping(&self) -> Result<(), SendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError);
        }
        let mut sender = self.sender.lock().await;
        sender.send(Message::Ping(Vec::new().into())).await.map_err(|_| SendError)
    }
}

#[async_trait]
impl OutboundChannel for WsChannel {
    async fn send(&self, msg: &WsOutgoing) -> Result<(), SendError> {
        let payload = serde_json::to_string(msg).map_err(|_| SendError)?;
        self.send_raw(&payload).await
    }

    async fn send_raw(&self, payload: &str) -> Result<(), SendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError);
        }
        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Text(payload.to_string().into()))
            .await
            .map_err(|_| SendError)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The three sliding-window counters a connection enforces against itself
/// (§4.4): a ping-only cap, a cap over every other frame, and a combined
/// cap across both. Any one tripping rejects the frame.
pub struct ConnectionLimiters {
    ping: SlidingWindowCounter,
    messages: SlidingWindowCounter,
    combined: SlidingWindowCounter,
    status_report: SlidingWindowCounter,
}

impl ConnectionLimiters {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            ping: SlidingWindowCounter::new(config.rate_limit_ping_per_sec, config.rate_limit_window_secs * 1000),
            messages: SlidingWindowCounter::new(
                config.rate_limit_messages_per_sec,
                config.rate_limit_window_secs * 1000,
            ),
            combined: SlidingWindowCounter::new(
                config.rate_limit_combined_per_sec,
                config.rate_limit_window_secs * 1000,
            ),
            status_report: SlidingWindowCounter::new(
                crate::protocol_constants::STATUS_REPORT_RATE_LIMIT_PER_SEC,
                config.rate_limit_window_secs * 1000,
            ),
        }
    }

    /// Admits one inbound `statusReport` frame at `now_ms` (§4.6 step 1).
    ///
    /// Distinct from [`Self::admit_message`]: this cap is per-client at
    /// ≤1/s and excess reports are dropped silently rather than producing
    /// an `error` frame or terminating the connection — the frame has
    /// already cleared the general message cap by the time this is
    /// consulted.
    pub fn admit_status_report(&self, now_ms: u64) -> bool {
        self.status_report.admit(now_ms)
    }

    /// Admits one inbound `ping` frame at `now_ms`.
    pub fn admit_ping(&self, now_ms: u64) -> bool {
        // Both counters must be consulted even if the first rejects, so a
        // rejected frame still counts against the combined window — a
        // client that floods with pings shouldn't get a free pass on the
        // combined cap just because its ping cap tripped first.
        let ping_ok = self.ping.admit(now_ms);
        let combined_ok = self.combined.admit(now_ms);
        ping_ok && combined_ok
    }

    /// Admits one inbound non-`ping` frame at `now_ms`.
    pub fn admit_message(&self, now_ms: u64) -> bool {
        let message_ok = self.messages.admit(now_ms);
        let combined_ok = self.combined.admit(now_ms);
        message_ok && combined_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiters() -> ConnectionLimiters {
        let mut config = Config::default();
        config.rate_limit_ping_per_sec = 2;
        config.rate_limit_messages_per_sec = 3;
        config.rate_limit_combined_per_sec = 4;
        config.rate_limit_window_secs = 1;
        ConnectionLimiters::new(&config)
    }

    #[test]
    fn ping_cap_is_enforced_independently() {
        let limiters = limiters();
        assert!(limiters.admit_ping(0));
        assert!(limiters.admit_ping(0));
        assert!(!limiters.admit_ping(0));
    }

    #[test]
    fn combined_cap_trips_before_the_individual_message_cap_if_lower() {
        let mut config = Config::default();
        config.rate_limit_ping_per_sec = 5;
        config.rate_limit_messages_per_sec = 5;
        config.rate_limit_combined_per_sec = 2;
        config.rate_limit_window_secs = 1;
        let limiters = ConnectionLimiters::new(&config);

        assert!(limiters.admit_message(0));
        assert!(limiters.admit_message(0));
        assert!(!limiters.admit_message(0));
    }

    #[test]
    fn status_report_cap_admits_once_per_second_and_is_independent_of_message_cap() {
        let limiters = limiters();
        assert!(limiters.admit_status_report(0));
        assert!(!limiters.admit_status_report(0));
        assert!(limiters.admit_status_report(1_000));
    }

    #[test]
    fn ping_and_message_caps_are_independent_pools() {
        let limiters = limiters();
        assert!(limiters.admit_ping(0));
        assert!(limiters.admit_message(0));
        assert!(limiters.admit_message(0));
        // Combined cap (4) not yet hit: one ping + two messages = 3.
        assert!(limiters.admit_ping(0));
        // Now combined is at 4; anything further is rejected.
        assert!(!limiters.admit_message(0));
    }
}
