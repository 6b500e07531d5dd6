//! Sync controller (C6): the periodic position tick and status-report
//! drift correction.
//!
//! Scheduled-start semantics (the `scheduledAt` carried on `play`/`seek`)
//! live with the dispatcher, since they're stamped at mutation time; this
//! module is the other half — the background loop that keeps already-synced
//! clients converged, and the per-report correction path.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::channel::OutboundChannel;
use crate::clock::now_millis;
use crate::error::PlaysyncError;
use crate::manager::{Manager, SharedRoom};
use crate::notifier;
use crate::protocol::WsOutgoing;
use crate::protocol_constants::{
    DRIFT_CORRECTION_COOLDOWN_SECS, DRIFT_THRESHOLD_MS, SYNC_TICK_INTERVAL_SECS,
};
use crate::room::PlayState;
use crate::validation::validate_position;

/// Runs one 1 Hz tick loop until `cancel` fires (§4.6, §5).
///
/// Each tick snapshots the room directory, then for every room currently
/// `PLAYING` with more than one participant, builds one `syncTick` payload
/// and fans it out to every non-host participant.
pub async fn run_sync_tick_loop(manager: Arc<Manager>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(SYNC_TICK_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("sync tick loop shutting down");
                return;
            }
            _ = ticker.tick() => {
                run_sync_tick(&manager).await;
            }
        }
    }
}

/// Runs a single tick pass over every room in `manager`, without waiting on
/// a timer. Split out from [`run_sync_tick_loop`] so tests can drive it
/// deterministically.
pub async fn run_sync_tick(manager: &Manager) {
    for room in manager.all_rooms() {
        let tick = {
            let guard = room.read();
            if guard.state() != PlayState::Playing || guard.participant_count() <= 1 {
                None
            } else {
                Some(WsOutgoing::SyncTick {
                    position: guard.effective_position(),
                    server_time: now_millis(),
                })
            }
        };
        if let Some(tick) = tick {
            notifier::broadcast_to_non_host(&room, &tick).await;
        }
    }
}

/// A server-issued correction computed by [`handle_status_report`], sent
/// after the room lock has been released.
enum Correction {
    ForceTrack {
        track_index: i64,
        position: f64,
        track: crate::protocol::TrackMetadata,
    },
    ForceResync {
        position: f64,
    },
}

/// Processes one `statusReport{trackIndex, position}` from a non-host
/// participant (§4.6 steps 2-5).
///
/// Per-client rate limiting (step 1) happens above this call, in the
/// connection's own sliding-window counter, since it has no room to consult
/// yet when the frame arrives. This function validates the position,
/// snapshots the room under one lock acquisition, and — if a correction is
/// warranted — sends it directly to `channel` once the lock is released.
pub async fn handle_status_report(
    room: &SharedRoom,
    channel: &Arc<dyn OutboundChannel>,
    track_index: i64,
    position: f64,
    now_ms: u64,
) -> Result<(), PlaysyncError> {
    validate_position(position, None)?;

    let correction = {
        let mut guard = room.write();
        if track_index != guard.track_index() {
            guard.track().cloned().map(|track| Correction::ForceTrack {
                track_index: guard.track_index(),
                position: guard.effective_position(),
                track,
            })
        } else if guard.state() == PlayState::Playing {
            let expected = guard.effective_position();
            let drift_ms = ((position - expected).abs() * 1000.0) as u64;
            if drift_ms > DRIFT_THRESHOLD_MS
                && guard.try_enter_resync_cooldown(now_ms, DRIFT_CORRECTION_COOLDOWN_SECS * 1000)
            {
                Some(Correction::ForceResync { position: expected })
            } else {
                None
            }
        } else {
            None
        }
    };

    match correction {
        Some(Correction::ForceTrack {
            track_index,
            position,
            track,
        }) => {
            let msg = WsOutgoing::ForceTrack {
                track_index,
                position,
                track,
                server_time: now_millis(),
            };
            let _ = channel.send(&msg).await;
        }
        Some(Correction::ForceResync { position }) => {
            let msg = WsOutgoing::ForceResync {
                position,
                server_time: now_millis(),
            };
            let _ = channel.send(&msg).await;
        }
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;
    use crate::manager::Manager;
    use crate::protocol::{Role, TrackMetadata};
    use crate::room::Participant;

    fn track() -> TrackMetadata {
        TrackMetadata {
            audio_id: 1,
            owner_id: 1,
            audio_uuid: "u".into(),
            filename: "f".into(),
            title: "t".into(),
            artist: "a".into(),
            duration: 300.0,
            qualities: vec!["hi".into()],
        }
    }

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

    #[tokio::test]
    async fn tick_reaches_non_host_participants_of_playing_multi_user_rooms() {
        let manager = Manager::new(500, 5, 5);
        let (room, _code) = manager.create_room(1, "owner".into()).unwrap();
        let host_chan = Arc::new(RecordingChannel::new());
        let listener_chan = Arc::new(RecordingChannel::new());
        room.write()
            .add_participant(participant("host", 1, Arc::clone(&host_chan)))
            .unwrap();
        room.write()
            .add_participant(participant("listener", 2, Arc::clone(&listener_chan)))
            .unwrap();
        room.write().set_track(track(), 0);
        room.write().play(0.0);

        run_sync_tick(&manager).await;

        assert!(host_chan.sent_raw().is_empty());
        assert_eq!(listener_chan.sent_raw().len(), 1);
    }

    #[tokio::test]
    async fn tick_skips_rooms_with_a_single_participant() {
        let manager = Manager::new(500, 5, 5);
        let (room, _code) = manager.create_room(1, "owner".into()).unwrap();
        let host_chan = Arc::new(RecordingChannel::new());
        room.write()
            .add_participant(participant("host", 1, Arc::clone(&host_chan)))
            .unwrap();
        room.write().set_track(track(), 0);
        room.write().play(0.0);

        run_sync_tick(&manager).await;

        assert!(host_chan.sent_raw().is_empty());
    }

    #[tokio::test]
    async fn status_report_with_wrong_track_sends_force_track_to_the_reporter() {
        let manager = Manager::new(500, 5, 5);
        let (room, _code) = manager.create_room(1, "owner".into()).unwrap();
        room.write().set_track(track(), 3);
        room.write().play(0.0);
        let recorder = Arc::new(RecordingChannel::new());
        let chan: Arc<dyn OutboundChannel> = Arc::clone(&recorder) as Arc<dyn OutboundChannel>;

        handle_status_report(&room, &chan, 2, 30.0, now_millis())
            .await
            .unwrap();

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            WsOutgoing::ForceTrack { track_index, .. } => assert_eq!(*track_index, 3),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_report_beyond_drift_threshold_triggers_force_resync() {
        let manager = Manager::new(500, 5, 5);
        let (room, _code) = manager.create_room(1, "owner".into()).unwrap();
        room.write().set_track(track(), 0);
        room.write().play(0.0);
        let recorder = Arc::new(RecordingChannel::new());
        let chan: Arc<dyn OutboundChannel> = Arc::clone(&recorder) as Arc<dyn OutboundChannel>;

        // Server effective position is ~0s; reporting 5s is a 5000ms drift.
        handle_status_report(&room, &chan, 0, 5.0, now_millis())
            .await
            .unwrap();

        assert_eq!(recorder.sent().len(), 1);
        assert!(matches!(recorder.sent()[0], WsOutgoing::ForceResync { .. }));
    }

    #[tokio::test]
    async fn status_report_within_drift_threshold_sends_nothing() {
        let manager = Manager::new(500, 5, 5);
        let (room, _code) = manager.create_room(1, "owner".into()).unwrap();
        room.write().set_track(track(), 0);
        room.write().play(0.0);
        let recorder = Arc::new(RecordingChannel::new());
        let chan: Arc<dyn OutboundChannel> = Arc::clone(&recorder) as Arc<dyn OutboundChannel>;

        handle_status_report(&room, &chan, 0, 0.05, now_millis())
            .await
            .unwrap();

        assert!(recorder.sent().is_empty());
    }

    #[tokio::test]
    async fn status_report_rejects_non_finite_position() {
        let manager = Manager::new(500, 5, 5);
        let (room, _code) = manager.create_room(1, "owner".into()).unwrap();
        let chan: Arc<dyn OutboundChannel> = Arc::new(RecordingChannel::new());

        let err = handle_status_report(&room, &chan, 0, f64::NAN, now_millis())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }
}
