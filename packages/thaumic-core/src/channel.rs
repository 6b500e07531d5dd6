//! Outbound-frame seam between room/manager logic and a live connection.
//!
//! Room mutators and the notifier never touch a socket directly — they hold
//! an `Arc<dyn OutboundChannel>` per participant and call through it. This
//! is what lets the room lock be released before any network I/O happens
//! (§5) and what unifies the pre-join/post-join writer that the original
//! implementation split across two mutexes (§9): both phases call through
//! the same trait object, so dispatch code never branches on join state.

use async_trait::async_trait;

use crate::protocol::WsOutgoing;

/// Failure writing to a participant's underlying transport.
///
/// Carries no detail beyond "the peer is gone" — the caller's only
/// reasonable response is to drop the participant (§7, Peer-gone).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendError;

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to write to peer")
    }
}

impl std::error::Error for SendError {}

/// A serialized path to one participant's transport.
///
/// Implementations must serialize concurrent `send`/`send_control` calls
/// themselves (the "`SerialWriter`" of §9) since the room lock is never
/// held while this is called, multiple tasks may hold the same handle, and
/// the underlying frame writer forbids concurrent writes.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Sends one application-level message.
    async fn send(&self, msg: &WsOutgoing) -> Result<(), SendError>;

    /// Sends an already-serialized frame payload.
    ///
    /// Used by broadcast fanout (§4.8) to marshal a message once per
    /// broadcast and reuse the same bytes across every recipient, instead
    /// of re-serializing per participant.
    async fn send_raw(&self, payload: &str) -> Result<(), SendError>;

    /// Closes the underlying transport, e.g. after a `kick` or
    /// `roomClosed`.
    fn close(&self);
}

/// Test double that records every message sent to it instead of writing to
/// a real transport.
///
/// Mirrors the trait-at-the-seam / one-production-impl / one-test-double
/// shape used by the core's other platform abstractions.
#[derive(Default)]
pub struct RecordingChannel {
    sent: parking_lot::Mutex<Vec<WsOutgoing>>,
    sent_raw: parking_lot::Mutex<Vec<String>>,
    closed: std::sync::atomic::AtomicBool,
}

impl RecordingChannel {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of messages sent via `send`, in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<WsOutgoing> {
        self.sent.lock().clone()
    }

    /// Returns a snapshot of payloads sent via `send_raw`, in send order.
    ///
    /// `WsOutgoing` has no `Deserialize` impl (the `Error` variant's code is
    /// `&'static str`, not owned), so a raw payload can't be parsed back
    /// into a typed message the way `sent()` does — callers that exercise
    /// the marshal-once path assert against the serialized text instead.
    #[must_use]
    pub fn sent_raw(&self) -> Vec<String> {
        self.sent_raw.lock().clone()
    }

    /// True if `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboundChannel for RecordingChannel {
    async fn send(&self, msg: &WsOutgoing) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError);
        }
        self.sent.lock().push(msg.clone());
        Ok(())
    }

    async fn send_raw(&self, payload: &str) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError);
        }
        self.sent_raw.lock().push(payload.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WsOutgoing {
        WsOutgoing::Pong {
            client_time: 1,
            server_time: 2,
        }
    }

    #[tokio::test]
    async fn recording_channel_captures_sent_messages_in_order() {
        let channel = RecordingChannel::new();
        channel.send(&sample()).await.unwrap();
        channel
            .send(&WsOutgoing::SyncTick {
                position: 1.0,
                server_time: 3,
            })
            .await
            .unwrap();
        assert_eq!(channel.sent().len(), 2);
    }

    #[tokio::test]
    async fn closed_channel_rejects_further_sends() {
        let channel = RecordingChannel::new();
        channel.close();
        assert!(channel.is_closed());
        assert!(channel.send(&sample()).await.is_err());
    }

    #[tokio::test]
    async fn send_raw_records_the_payload_verbatim_and_is_closeable() {
        let channel = RecordingChannel::new();
        channel.send_raw(r#"{"type":"pong"}"#).await.unwrap();
        assert_eq!(channel.sent_raw(), vec![r#"{"type":"pong"}"#.to_string()]);
        assert!(channel.sent().is_empty());

        channel.close();
        assert!(channel.send_raw(r#"{"type":"pong"}"#).await.is_err());
    }
}
