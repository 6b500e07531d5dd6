//! Broadcast helpers (C8).
//!
//! Every fanout here follows the same shape: snapshot participant channels
//! under the room (or directory) lock, release it, then send. This is what
//! keeps §5's lock-order rule intact — no lock is ever held across an
//! outbound write.

use std::sync::Arc;

use crate::channel::OutboundChannel;
use crate::manager::{Manager, SharedRoom};
use crate::protocol::WsOutgoing;

/// Sends `msg` to every participant in `room`, optionally skipping one
/// session (the sender, for messages it already has a reply to).
pub async fn broadcast(room: &SharedRoom, msg: &WsOutgoing, exclude_session_id: Option<&str>) {
    let targets = room.read().participant_channels();
    send_to_all(targets, msg, exclude_session_id).await;
}

/// Sends `msg` to every non-host participant in `room` (the sync tick's
/// fanout set, §4.6).
pub async fn broadcast_to_non_host(room: &SharedRoom, msg: &WsOutgoing) {
    let targets = room.read().non_host_channels();
    send_to_all(targets, msg, None).await;
}

/// Marshals `msg` once and writes the same payload bytes to every target
/// (§4.8), instead of letting each participant's channel re-serialize it.
async fn send_to_all(
    targets: Vec<(String, Arc<dyn OutboundChannel>)>,
    msg: &WsOutgoing,
    exclude_session_id: Option<&str>,
) {
    if targets.is_empty() {
        return;
    }
    let payload = serde_json::to_string(msg).expect("WsOutgoing always serializes");
    for (session_id, channel) in targets {
        if Some(session_id.as_str()) == exclude_session_id {
            continue;
        }
        if channel.send_raw(&payload).await.is_err() {
            log::warn!("notifier: dropping unreachable participant {session_id}");
        }
    }
}

/// Sends `msg` to every participant across every room whose username
/// matches, used by `send_to_user_by_username` (§4.8, §6.1 user-targeted
/// delivery across all of a user's active connections).
pub async fn send_to_user_by_username(manager: &Manager, username: &str, msg: &WsOutgoing) {
    let targets = manager.channels_for_username(username);
    if targets.is_empty() {
        return;
    }
    let payload = serde_json::to_string(msg).expect("WsOutgoing always serializes");
    for channel in targets {
        if channel.send_raw(&payload).await.is_err() {
            log::warn!("notifier: dropping unreachable participant for user {username}");
        }
    }
}

/// Closes every participant's channel in `room` and sends `msg` first if
/// provided — used by `closeRoom` (all participants) and the sweeper (idle
/// eviction, §4.3).
pub async fn broadcast_and_close(room: &SharedRoom, msg: Option<&WsOutgoing>) {
    let targets = room.read().participant_channels();
    let payload = msg.map(|m| serde_json::to_string(m).expect("WsOutgoing always serializes"));
    for (_session_id, channel) in targets {
        if let Some(payload) = &payload {
            let _ = channel.send_raw(payload).await;
        }
        channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;
    use crate::clock::now_millis;
    use crate::manager::Manager;
    use crate::protocol::Role;
    use crate::room::Participant;
    use std::sync::Arc;

    fn participant(session_id: &str, user_id: i64, channel: Arc<RecordingChannel>) -> Participant {
        Participant {
            session_id: session_id.into(),
            user_id,
            username: format!("user{user_id}"),
            role: Role::User,
            is_host: false,
            joined_at: now_millis(),
            channel,
        }
    }

    fn sample_msg() -> WsOutgoing {
        WsOutgoing::RoomClosed {
            server_time: now_millis(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_participant_except_excluded() {
        let manager = Manager::new(500, 5, 5);
        let (room, _code) = manager.create_room(1, "owner".into()).unwrap();
        let chan_a = Arc::new(RecordingChannel::new());
        let chan_b = Arc::new(RecordingChannel::new());
        room.write()
            .add_participant(participant("a", 1, Arc::clone(&chan_a) as Arc<dyn OutboundChannel>))
            .unwrap();
        room.write()
            .add_participant(participant("b", 2, Arc::clone(&chan_b) as Arc<dyn OutboundChannel>))
            .unwrap();

        broadcast(&room, &sample_msg(), Some("a")).await;
        assert!(chan_a.sent_raw().is_empty());
        assert_eq!(chan_b.sent_raw().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_to_non_host_skips_the_host() {
        let manager = Manager::new(500, 5, 5);
        let (room, _code) = manager.create_room(1, "owner".into()).unwrap();
        let host_chan = Arc::new(RecordingChannel::new());
        let listener_chan = Arc::new(RecordingChannel::new());
        room.write()
            .add_participant(participant("host", 1, Arc::clone(&host_chan) as Arc<dyn OutboundChannel>))
            .unwrap();
        room.write()
            .add_participant(participant(
                "listener",
                2,
                Arc::clone(&listener_chan) as Arc<dyn OutboundChannel>,
            ))
            .unwrap();

        broadcast_to_non_host(&room, &sample_msg()).await;
        assert!(host_chan.sent_raw().is_empty());
        assert_eq!(listener_chan.sent_raw().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_and_close_closes_every_channel() {
        let manager = Manager::new(500, 5, 5);
        let (room, _code) = manager.create_room(1, "owner".into()).unwrap();
        let chan = Arc::new(RecordingChannel::new());
        room.write()
            .add_participant(participant("a", 1, Arc::clone(&chan) as Arc<dyn OutboundChannel>))
            .unwrap();

        broadcast_and_close(&room, Some(&sample_msg())).await;
        assert!(chan.is_closed());
        assert_eq!(chan.sent_raw().len(), 1);
    }
}
