//! WebSocket dispatcher (C5): the read loop and per-message handlers.
//!
//! One session owns one room membership at a time. Every handler below
//! follows the same shape: authorize against the room's current state,
//! mutate under the room lock, then broadcast or reply *after* releasing it
//! (§5) — the room lock is never held across a `channel.send`/`broadcast`
//! call.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use rand::Rng as _;

use crate::api::AppState;
use crate::channel::OutboundChannel;
use crate::clock::now_millis;
use crate::collaborators::AuthenticatedUser;
use crate::connection::{ConnectionLimiters, WsChannel};
use crate::error::{PlaysyncError, RateLimitKind};
use crate::manager::{ConnectionSlot, SharedRoom};
use crate::notifier;
use crate::protocol::{WsIncoming, WsOutgoing};
use crate::sync::handle_status_report;
use crate::validation::{validate_position, validate_track_index};

/// Generates a session id unique to one connection's lifetime. Unlike a room
/// code this is never looked up by a human, so a plain random hex string is
/// enough — no retry-on-collision loop, since a collision would only matter
/// within the scope of one room's participant list and `add_participant`
/// already treats a duplicate *user* id as a takeover, not a duplicate
/// session id.
fn generate_session_id() -> String {
    let bytes: [u8; 12] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Tracks which room (if any) this connection currently belongs to.
struct Membership {
    room: SharedRoom,
    room_code: String,
}

/// Main WebSocket connection handler; owns the session from upgrade to
/// disconnect.
pub async fn handle_ws(
    socket: WebSocket,
    state: AppState,
    user: AuthenticatedUser,
    _slot: ConnectionSlot,
    remote_addr: SocketAddr,
) {
    let (sender, mut receiver) = socket.split();
    let ws_channel = Arc::new(WsChannel::new(sender));
    let channel: Arc<dyn OutboundChannel> = Arc::clone(&ws_channel) as Arc<dyn OutboundChannel>;
    let limiters = ConnectionLimiters::new(&state.config);
    let session_id = generate_session_id();

    log::info!(
        "[WS] {session_id} connected for user {} ({remote_addr})",
        user.user_id
    );

    let mut membership: Option<Membership> = None;
    let mut last_activity = Instant::now();
    let mut ping_interval = tokio::time::interval(Duration::from_secs(state.config.ws_ping_interval_secs));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = state.cancel_token.cancelled() => {
                log::info!("[WS] {session_id} closing for shutdown");
                break;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        if !dispatch_frame(&state, &user, &session_id, &channel, &limiters, &mut membership, &text, remote_addr).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => {
                        last_activity = Instant::now();
                    }
                }
            }
            _ = ping_interval.tick() => {
                if last_activity.elapsed() > Duration::from_secs(state.config.ws_read_deadline_secs) {
                    log::warn!("[WS] {session_id} read deadline exceeded, closing");
                    break;
                }
                let _ = ws_channel.send_ping().await;
            }
        }
    }

    channel.close();
    cleanup(&state, &session_id, membership).await;
    log::info!("[WS] {session_id} disconnected");
}

/// Parses and dispatches one inbound frame. Returns `false` if the
/// connection should be closed (rate-limit termination or a frame that
/// can't be attributed to a known message type's rate-limit bucket).
async fn dispatch_frame(
    state: &AppState,
    user: &AuthenticatedUser,
    session_id: &str,
    channel: &Arc<dyn OutboundChannel>,
    limiters: &ConnectionLimiters,
    membership: &mut Option<Membership>,
    text: &str,
    remote_addr: SocketAddr,
) -> bool {
    let incoming: WsIncoming = match serde_json::from_str(text) {
        Ok(incoming) => incoming,
        Err(_) => {
            reply_error(channel, &PlaysyncError::Validation("malformed message".into())).await;
            return true;
        }
    };

    let now = now_millis();
    let admitted = if matches!(incoming, WsIncoming::Ping { .. }) {
        limiters.admit_ping(now)
    } else {
        limiters.admit_message(now)
    };
    if !admitted {
        let err = PlaysyncError::RateLimit(RateLimitKind::MessageFlood);
        reply_error(channel, &err).await;
        return false;
    }

    if matches!(incoming, WsIncoming::StatusReport { .. }) && !limiters.admit_status_report(now) {
        // Per-client statusReport cadence cap (§4.6 step 1): excess reports
        // are dropped silently, not surfaced as an `error` frame — the
        // frame already cleared the general message cap above.
        return true;
    }

    if let Err(err) = handle_message(state, user, session_id, channel, membership, incoming, remote_addr).await {
        reply_error(channel, &err).await;
        return !err.terminates_connection();
    }
    true
}

async fn reply_error(channel: &Arc<dyn OutboundChannel>, err: &PlaysyncError) {
    let msg = WsOutgoing::Error {
        code: err.code(),
        error: err.to_string(),
        server_time: now_millis(),
    };
    let _ = channel.send(&msg).await;
}

async fn handle_message(
    state: &AppState,
    user: &AuthenticatedUser,
    session_id: &str,
    channel: &Arc<dyn OutboundChannel>,
    membership: &mut Option<Membership>,
    incoming: WsIncoming,
    remote_addr: SocketAddr,
) -> Result<(), PlaysyncError> {
    match incoming {
        WsIncoming::Create => handle_create(state, user, session_id, channel, membership).await,
        WsIncoming::Join { room_code } => {
            handle_join(state, user, session_id, channel, membership, room_code, remote_addr).await
        }
        WsIncoming::Ping { client_time } => {
            let msg = WsOutgoing::Pong {
                client_time,
                server_time: now_millis(),
            };
            let _ = channel.send(&msg).await;
            Ok(())
        }
        WsIncoming::Play { position } => handle_play(membership, session_id, position).await,
        WsIncoming::Pause => handle_pause(membership, session_id).await,
        WsIncoming::Seek { position } => handle_seek(membership, session_id, position).await,
        WsIncoming::Kick { target_session_id } => {
            handle_kick(state, membership, session_id, target_session_id).await
        }
        WsIncoming::CloseRoom => handle_close_room(state, membership, session_id).await,
        WsIncoming::NextTrack { track_index } => {
            handle_next_track(state, membership, session_id, track_index).await
        }
        WsIncoming::StatusReport { track_index, position } => {
            let Some(m) = membership.as_ref() else {
                return Err(PlaysyncError::Validation("not in a room".into()));
            };
            handle_status_report(&m.room, channel, track_index, position, now_millis()).await
        }
    }
}

async fn handle_create(
    state: &AppState,
    user: &AuthenticatedUser,
    session_id: &str,
    channel: &Arc<dyn OutboundChannel>,
    membership: &mut Option<Membership>,
) -> Result<(), PlaysyncError> {
    if let Some(old) = membership.take() {
        cleanup(state, session_id, Some(old)).await;
    }
    if !user.role.can_create_room() {
        return Err(PlaysyncError::Authorization("role cannot create rooms".into()));
    }

    let (room, room_code) = state.manager.create_room(user.user_id, user.username.clone())?;
    room.write().add_participant(crate::room::Participant {
        session_id: session_id.to_string(),
        user_id: user.user_id,
        username: user.username.clone(),
        role: user.role,
        is_host: false,
        joined_at: now_millis(),
        channel: Arc::clone(channel),
    })?;

    let snapshot = room.read();
    let msg = WsOutgoing::Created {
        room_code: room_code.clone(),
        is_host: snapshot.is_host_and_owner(session_id),
        users: snapshot.participant_views(),
        server_time: now_millis(),
    };
    drop(snapshot);
    let _ = channel.send(&msg).await;
    *membership = Some(Membership { room, room_code });
    Ok(())
}

async fn handle_join(
    state: &AppState,
    user: &AuthenticatedUser,
    session_id: &str,
    channel: &Arc<dyn OutboundChannel>,
    membership: &mut Option<Membership>,
    room_code: String,
    remote_addr: SocketAddr,
) -> Result<(), PlaysyncError> {
    let now = now_millis();
    if !state.join_limiter.admit(&remote_addr.ip().to_string(), now) {
        return Err(PlaysyncError::RateLimit(RateLimitKind::JoinFlood));
    }
    if let Some(old) = membership.take() {
        cleanup(state, session_id, Some(old)).await;
    }
    let room = state
        .manager
        .get_room(&room_code)
        .ok_or_else(|| PlaysyncError::NotFound("room not found".into()))?;

    room.write().add_participant(crate::room::Participant {
        session_id: session_id.to_string(),
        user_id: user.user_id,
        username: user.username.clone(),
        role: user.role,
        is_host: false,
        joined_at: now_millis(),
        channel: Arc::clone(channel),
    })?;

    let (joined_msg, catch_up, client_count) = {
        let snapshot = room.read();
        let joined_msg = WsOutgoing::Joined {
            room_code: room_code.clone(),
            is_host: snapshot.is_host_and_owner(session_id),
            users: snapshot.participant_views(),
            server_time: now_millis(),
        };
        let catch_up = catch_up_message(&snapshot);
        (joined_msg, catch_up, snapshot.participant_count())
    };
    let _ = channel.send(&joined_msg).await;
    for msg in &catch_up {
        let _ = channel.send(msg).await;
    }
    if state.persistence.get_playlist_by_room(&room_code).await.is_some() {
        let _ = channel
            .send(&WsOutgoing::PlaylistUpdate {
                server_time: now_millis(),
            })
            .await;
    }

    let user_joined = WsOutgoing::UserJoined {
        user: room.read().participant_views().into_iter().find(|v| v.session_id == session_id).expect("just inserted"),
        client_count,
        server_time: now_millis(),
    };
    notifier::broadcast(&room, &user_joined, Some(session_id)).await;

    *membership = Some(Membership { room, room_code });
    Ok(())
}

/// Builds the messages that bring a freshly-joined participant up to speed
/// on a room's current playback, if it has a track loaded: the track itself,
/// followed by a `play` if the room is currently playing. `scheduled_at` is
/// just `server_time` here — there's nothing to schedule, the joiner starts
/// from the room's current effective position immediately.
fn catch_up_message(room: &crate::room::Room) -> Vec<WsOutgoing> {
    use crate::room::PlayState;
    let Some(track) = room.track().cloned() else {
        return Vec::new();
    };
    let now = now_millis();
    let mut out = vec![WsOutgoing::TrackChange {
        track_index: room.track_index(),
        track: track.clone(),
        server_time: now,
    }];
    if matches!(room.state(), PlayState::Playing) {
        out.push(WsOutgoing::Play {
            position: room.effective_position(),
            server_time: now,
            scheduled_at: now,
            track: Some(track),
        });
    }
    out
}

async fn handle_play(
    membership: &mut Option<Membership>,
    session_id: &str,
    position: f64,
) -> Result<(), PlaysyncError> {
    let m = membership.as_ref().ok_or_else(|| PlaysyncError::Validation("not in a room".into()))?;
    {
        let guard = m.room.read();
        if !guard.is_host_and_owner(session_id) {
            return Err(PlaysyncError::Authorization("only the host may control playback".into()));
        }
        let Some(track) = guard.track() else {
            return Err(PlaysyncError::Validation("请先选择音频".into()));
        };
        validate_position(position, Some(track.duration))?;
    }
    let msg = {
        let mut guard = m.room.write();
        guard.play(position);
        let server_time = now_millis();
        WsOutgoing::Play {
            position,
            server_time,
            scheduled_at: server_time + crate::protocol_constants::START_DELAY_MS,
            track: guard.track().cloned(),
        }
    };
    notifier::broadcast(&m.room, &msg, None).await;
    Ok(())
}

async fn handle_pause(membership: &mut Option<Membership>, session_id: &str) -> Result<(), PlaysyncError> {
    let m = membership.as_ref().ok_or_else(|| PlaysyncError::Validation("not in a room".into()))?;
    if !m.room.read().is_host_and_owner(session_id) {
        return Err(PlaysyncError::Authorization("only the host may control playback".into()));
    }
    let position = m.room.write().pause();
    let msg = WsOutgoing::Pause {
        position,
        server_time: now_millis(),
    };
    notifier::broadcast(&m.room, &msg, None).await;
    Ok(())
}

async fn handle_seek(
    membership: &mut Option<Membership>,
    session_id: &str,
    position: f64,
) -> Result<(), PlaysyncError> {
    let m = membership.as_ref().ok_or_else(|| PlaysyncError::Validation("not in a room".into()))?;
    {
        let guard = m.room.read();
        if !guard.is_host_and_owner(session_id) {
            return Err(PlaysyncError::Authorization("only the host may control playback".into()));
        }
        let Some(track) = guard.track() else {
            return Err(PlaysyncError::Validation("请先选择音频".into()));
        };
        validate_position(position, Some(track.duration))?;
    }
    let msg = {
        let mut guard = m.room.write();
        guard.seek(position);
        let server_time = now_millis();
        WsOutgoing::Seek {
            position,
            server_time,
            scheduled_at: server_time + crate::protocol_constants::START_DELAY_MS,
            track: guard.track().cloned(),
        }
    };
    notifier::broadcast(&m.room, &msg, None).await;
    Ok(())
}

async fn handle_kick(
    state: &AppState,
    membership: &mut Option<Membership>,
    session_id: &str,
    target_session_id: String,
) -> Result<(), PlaysyncError> {
    let m = membership.as_ref().ok_or_else(|| PlaysyncError::Validation("not in a room".into()))?;
    if !m.room.read().is_owner(session_id) {
        return Err(PlaysyncError::Authorization("only the room owner may kick".into()));
    }
    let target_user_id = m
        .room
        .read()
        .find_by_session(&target_session_id)
        .map(|p| p.user_id)
        .ok_or_else(|| PlaysyncError::NotFound("participant not found".into()))?;

    let host_before = m.room.read().host_user_id();
    let Some((removed, now_empty)) = m.room.write().remove_participant_by_user_id(target_user_id) else {
        return Err(PlaysyncError::NotFound("participant not found".into()));
    };
    let _ = removed
        .channel
        .send(&WsOutgoing::Kicked {
            server_time: now_millis(),
        })
        .await;
    removed.channel.close();

    if now_empty {
        state.manager.delete_room(&m.room_code);
        state.config.cleanup_room_scratch_dir(&m.room_code).await;
    } else {
        let client_count = m.room.read().participant_count();
        let msg = WsOutgoing::UserLeft {
            session_id: target_session_id,
            client_count,
            server_time: now_millis(),
        };
        notifier::broadcast(&m.room, &msg, None).await;
        notify_host_transfer_if_changed(&m.room, host_before).await;
    }
    Ok(())
}

async fn handle_close_room(
    state: &AppState,
    membership: &mut Option<Membership>,
    session_id: &str,
) -> Result<(), PlaysyncError> {
    let m = membership.as_ref().ok_or_else(|| PlaysyncError::Validation("not in a room".into()))?;
    if !m.room.read().is_owner(session_id) {
        return Err(PlaysyncError::Authorization("only the room owner may close the room".into()));
    }
    state.manager.delete_room(&m.room_code);
    state.config.cleanup_room_scratch_dir(&m.room_code).await;
    let msg = WsOutgoing::RoomClosed {
        server_time: now_millis(),
    };
    notifier::broadcast_and_close(&m.room, Some(&msg)).await;
    *membership = None;
    Ok(())
}

async fn handle_next_track(
    state: &AppState,
    membership: &mut Option<Membership>,
    session_id: &str,
    track_index: i64,
) -> Result<(), PlaysyncError> {
    let m = membership.as_ref().ok_or_else(|| PlaysyncError::Validation("not in a room".into()))?;
    if !m.room.read().is_owner(session_id) {
        return Err(PlaysyncError::Authorization("only the room owner may change tracks".into()));
    }
    validate_track_index(track_index)?;

    let playlist_id = state
        .persistence
        .get_playlist_by_room(&m.room_code)
        .await
        .ok_or_else(|| PlaysyncError::NotFound("room has no playlist".into()))?;
    let items = state.persistence.get_playlist_items(playlist_id).await;
    let item = items
        .into_iter()
        .find(|item| item.track_index == track_index)
        .ok_or_else(|| PlaysyncError::NotFound("track index out of range".into()))?;
    let track = state
        .persistence
        .get_audio_file(item.audio_id)
        .await
        .ok_or_else(|| PlaysyncError::NotFound("track unavailable".into()))?;

    m.room.write().set_track(track.clone(), track_index);
    let msg = WsOutgoing::TrackChange {
        track_index,
        track,
        server_time: now_millis(),
    };
    notifier::broadcast(&m.room, &msg, None).await;
    Ok(())
}

async fn notify_host_transfer_if_changed(room: &SharedRoom, host_before: Option<i64>) {
    let host_after = room.read().host_user_id();
    if host_before == host_after {
        return;
    }
    if let Some(host_channel) = room.read().host_channel() {
        let msg = WsOutgoing::HostTransfer {
            is_host: true,
            server_time: now_millis(),
        };
        let _ = host_channel.send(&msg).await;
    }
}

/// Removes the session from its room (if any) on disconnect, promoting a
/// new host and notifying remaining participants, or deleting the room if
/// it's now empty (§4.2, §4.3).
async fn cleanup(state: &AppState, session_id: &str, membership: Option<Membership>) {
    let Some(m) = membership else { return };
    let host_before = m.room.read().host_user_id();
    let now_empty = m.room.write().remove_participant(session_id);
    if now_empty {
        state.manager.delete_room(&m.room_code);
        state.config.cleanup_room_scratch_dir(&m.room_code).await;
        return;
    }
    let client_count = m.room.read().participant_count();
    let msg = WsOutgoing::UserLeft {
        session_id: session_id.to_string(),
        client_count,
        server_time: now_millis(),
    };
    notifier::broadcast(&m.room, &msg, None).await;
    notify_host_transfer_if_changed(&m.room, host_before).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;
    use crate::collaborators::{InMemoryPersistence, NoopAuthProvider, PlaylistItem};
    use crate::config::Config;
    use crate::manager::Manager;
    use crate::protocol::{Role, TrackMetadata};

    fn state() -> AppState {
        AppState::builder()
            .manager(Arc::new(Manager::new(500, 5, 5)))
            .config(Arc::new(Config::default()))
            .auth(Arc::new(NoopAuthProvider))
            .persistence(Arc::new(InMemoryPersistence::new()))
            .build()
    }

    fn user(user_id: i64, username: &str, role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id,
            username: username.to_string(),
            role,
        }
    }

    fn recorder() -> (Arc<RecordingChannel>, Arc<dyn OutboundChannel>) {
        let recorder = Arc::new(RecordingChannel::new());
        let channel: Arc<dyn OutboundChannel> = Arc::clone(&recorder) as Arc<dyn OutboundChannel>;
        (recorder, channel)
    }

    fn track(audio_id: i64, duration: f64) -> TrackMetadata {
        TrackMetadata {
            audio_id,
            owner_id: 1,
            audio_uuid: "u".into(),
            filename: "f".into(),
            title: "t".into(),
            artist: "a".into(),
            duration,
            qualities: vec!["hi".into()],
        }
    }

    // S1 — a plain `user` role cannot `create`.
    #[tokio::test]
    async fn create_rejects_role_that_cannot_create_rooms() {
        let state = state();
        let (_rec, channel) = recorder();
        let mut membership = None;
        let err = handle_create(&state, &user(1, "a", Role::User), "s1", &channel, &mut membership)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "authorization");
        assert!(membership.is_none());
    }

    #[tokio::test]
    async fn create_seats_caller_as_host_and_owner() {
        let state = state();
        let (_rec, channel) = recorder();
        let mut membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &channel, &mut membership)
            .await
            .unwrap();
        let m = membership.as_ref().unwrap();
        assert!(m.room.read().is_host_and_owner("s1"));
    }

    // S1 — play with no track loaded is rejected.
    #[tokio::test]
    async fn play_without_a_loaded_track_is_rejected() {
        let state = state();
        let (_rec, channel) = recorder();
        let mut membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &channel, &mut membership)
            .await
            .unwrap();

        let err = handle_play(&mut membership, "s1", 0.0).await.unwrap_err();
        assert_eq!(err.code(), "validation");
        assert_eq!(err.to_string(), "请先选择音频");
    }

    #[tokio::test]
    async fn play_by_non_host_is_rejected() {
        let state = state();
        let (_owner_rec, owner_channel) = recorder();
        let mut owner_membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &owner_channel, &mut owner_membership)
            .await
            .unwrap();
        let room_code = owner_membership.as_ref().unwrap().room_code.clone();
        owner_membership
            .as_ref()
            .unwrap()
            .room
            .write()
            .set_track(track(1, 300.0), 0);

        let (_listener_rec, listener_channel) = recorder();
        let mut listener_membership = None;
        handle_join(
            &state,
            &user(200, "listener", Role::User),
            "s2",
            &listener_channel,
            &mut listener_membership,
            room_code,
            "127.0.0.1:9".parse().unwrap(),
        )
        .await
        .unwrap();

        let err = handle_play(&mut listener_membership, "s2", 10.0).await.unwrap_err();
        assert_eq!(err.code(), "authorization");
    }

    // S2 — scheduled-start alignment: play carries serverTime + 800ms.
    #[tokio::test]
    async fn play_broadcast_carries_scheduled_at_800ms_out() {
        let state = state();
        let (rec, channel) = recorder();
        let mut membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &channel, &mut membership)
            .await
            .unwrap();
        membership.as_ref().unwrap().room.write().set_track(track(1, 300.0), 0);

        handle_play(&mut membership, "s1", 12.0).await.unwrap();

        assert_eq!(membership.as_ref().unwrap().room.read().state(), crate::room::PlayState::Playing);
        let sent = rec.sent();
        let play = sent
            .iter()
            .find_map(|m| match m {
                WsOutgoing::Play {
                    position,
                    server_time,
                    scheduled_at,
                    ..
                } => Some((*position, *server_time, *scheduled_at)),
                _ => None,
            })
            .expect("expected a play broadcast to the owner's own channel");
        assert_eq!(play.0, 12.0);
        assert_eq!(play.2, play.1 + crate::protocol_constants::START_DELAY_MS);
    }

    #[tokio::test]
    async fn play_rejects_non_finite_position() {
        let state = state();
        let (_rec, channel) = recorder();
        let mut membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &channel, &mut membership)
            .await
            .unwrap();
        membership.as_ref().unwrap().room.write().set_track(track(1, 300.0), 0);

        let err = handle_play(&mut membership, "s1", f64::NAN).await.unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    // S5 — owner disconnects, ownership and host transfer to a remaining participant.
    #[tokio::test]
    async fn cleanup_transfers_ownership_to_remaining_participant_when_owner_leaves() {
        let state = state();
        let (_owner_rec, owner_channel) = recorder();
        let mut owner_membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &owner_channel, &mut owner_membership)
            .await
            .unwrap();
        let room_code = owner_membership.as_ref().unwrap().room_code.clone();
        let room = Arc::clone(&owner_membership.as_ref().unwrap().room);

        let (_b_rec, b_channel) = recorder();
        let mut b_membership = None;
        handle_join(
            &state,
            &user(200, "b", Role::User),
            "s2",
            &b_channel,
            &mut b_membership,
            room_code.clone(),
            "127.0.0.1:9".parse().unwrap(),
        )
        .await
        .unwrap();

        let (_c_rec, c_channel) = recorder();
        let mut c_membership = None;
        handle_join(
            &state,
            &user(300, "c", Role::User),
            "s3",
            &c_channel,
            &mut c_membership,
            room_code,
            "127.0.0.1:9".parse().unwrap(),
        )
        .await
        .unwrap();

        cleanup(&state, "s1", owner_membership).await;

        let guard = room.read();
        assert_eq!(guard.participant_count(), 2);
        let new_host = guard.host_user_id().unwrap();
        assert!(new_host == 200 || new_host == 300);
        assert_eq!(guard.owner_user_id, new_host);
    }

    // Room deleted from the manager once its last participant disconnects.
    #[tokio::test]
    async fn cleanup_deletes_the_room_once_it_is_empty() {
        let state = state();
        let (_rec, channel) = recorder();
        let mut membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &channel, &mut membership)
            .await
            .unwrap();
        let room_code = membership.as_ref().unwrap().room_code.clone();

        cleanup(&state, "s1", membership).await;

        assert!(state.manager.get_room(&room_code).is_none());
    }

    #[tokio::test]
    async fn join_unknown_room_code_is_not_found() {
        let state = state();
        let (_rec, channel) = recorder();
        let mut membership = None;
        let err = handle_join(
            &state,
            &user(200, "b", Role::User),
            "s2",
            &channel,
            &mut membership,
            "NOPE0000".to_string(),
            "127.0.0.1:9".parse().unwrap(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    // Only the room-owner may kick.
    #[tokio::test]
    async fn kick_by_non_owner_is_rejected() {
        let state = state();
        let (_owner_rec, owner_channel) = recorder();
        let mut owner_membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &owner_channel, &mut owner_membership)
            .await
            .unwrap();
        let room_code = owner_membership.as_ref().unwrap().room_code.clone();

        let (_b_rec, b_channel) = recorder();
        let mut b_membership = None;
        handle_join(
            &state,
            &user(200, "b", Role::User),
            "s2",
            &b_channel,
            &mut b_membership,
            room_code,
            "127.0.0.1:9".parse().unwrap(),
        )
        .await
        .unwrap();

        let err = handle_kick(&state, &mut b_membership, "s2", "s1".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "authorization");
    }

    #[tokio::test]
    async fn kick_evicts_target_and_closes_its_channel() {
        let state = state();
        let (_owner_rec, owner_channel) = recorder();
        let mut owner_membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &owner_channel, &mut owner_membership)
            .await
            .unwrap();
        let room_code = owner_membership.as_ref().unwrap().room_code.clone();

        let (b_rec, b_channel) = recorder();
        let mut b_membership = None;
        handle_join(
            &state,
            &user(200, "b", Role::User),
            "s2",
            &b_channel,
            &mut b_membership,
            room_code,
            "127.0.0.1:9".parse().unwrap(),
        )
        .await
        .unwrap();

        handle_kick(&state, &mut owner_membership, "s1", "s2".to_string())
            .await
            .unwrap();

        assert!(b_rec.is_closed());
        assert_eq!(owner_membership.as_ref().unwrap().room.read().participant_count(), 1);
    }

    // Only the room-owner may switch tracks.
    #[tokio::test]
    async fn next_track_by_non_owner_is_rejected() {
        let state = state();
        let (_owner_rec, owner_channel) = recorder();
        let mut owner_membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &owner_channel, &mut owner_membership)
            .await
            .unwrap();
        let room_code = owner_membership.as_ref().unwrap().room_code.clone();

        let (_b_rec, b_channel) = recorder();
        let mut b_membership = None;
        handle_join(
            &state,
            &user(200, "b", Role::User),
            "s2",
            &b_channel,
            &mut b_membership,
            room_code,
            "127.0.0.1:9".parse().unwrap(),
        )
        .await
        .unwrap();

        let err = handle_next_track(&state, &mut b_membership, "s2", 0).await.unwrap_err();
        assert_eq!(err.code(), "authorization");
    }

    #[tokio::test]
    async fn next_track_installs_resolved_metadata_and_stays_stopped() {
        let state = state();
        let (_owner_rec, owner_channel) = recorder();
        let mut owner_membership = None;
        handle_create(&state, &user(100, "owner", Role::Admin), "s1", &owner_channel, &mut owner_membership)
            .await
            .unwrap();
        let room_code = owner_membership.as_ref().unwrap().room_code.clone();

        let playlist_store = InMemoryPersistence::new();
        playlist_store.seed_playlist(&room_code, 7, vec![PlaylistItem { track_index: 0, audio_id: 55 }]);
        playlist_store.seed_track(track(55, 200.0));
        let state = AppState::builder()
            .manager(Arc::clone(&state.manager))
            .config(Arc::clone(&state.config))
            .auth(Arc::new(NoopAuthProvider))
            .persistence(Arc::new(playlist_store))
            .build();

        handle_next_track(&state, &mut owner_membership, "s1", 0).await.unwrap();

        let guard = owner_membership.as_ref().unwrap().room.read();
        assert_eq!(guard.track().unwrap().audio_id, 55);
        assert_eq!(guard.state(), crate::room::PlayState::Stopped);
    }
}

