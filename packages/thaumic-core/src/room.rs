//! Per-room playback state (C2).
//!
//! A [`Room`] is a tuple of participants, host, current track, and play
//! state (§3). Every mutator here acquires the room's own exclusive lock
//! (imposed by the caller via [`parking_lot::RwLock`] in
//! [`crate::manager::Manager`]) and returns a plain value — never an
//! `Arc`/guard that could tempt a caller into doing I/O while still holding
//! the lock.

use std::sync::Arc;

use crate::channel::OutboundChannel;
use crate::clock::now_millis;
use crate::error::{CapacityKind, PlaysyncError};
use crate::protocol::{ParticipantView, Role, TrackMetadata};

/// Playback state machine for a room (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
}

/// One authenticated user's single realtime session within a room.
pub struct Participant {
    pub session_id: String,
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub is_host: bool,
    pub joined_at: u64,
    pub channel: Arc<dyn OutboundChannel>,
}

impl Participant {
    fn view(&self) -> ParticipantView {
        ParticipantView {
            session_id: self.session_id.clone(),
            user_id: self.user_id,
            username: self.username.clone(),
            is_host: self.is_host,
        }
    }
}

/// A room: one short code, one owner, many participants, one track at a
/// time.
pub struct Room {
    pub code: String,
    pub owner_user_id: i64,
    pub owner_username: String,
    participants: Vec<Participant>,
    track: Option<TrackMetadata>,
    /// Index into the owning playlist of `track`, set by `nextTrack`.
    track_index: i64,
    state: PlayState,
    position_anchor: f64,
    start_instant_ms: u64,
    last_activity_ms: u64,
    last_resync_ms: u64,
    max_clients: usize,
}

impl Room {
    /// Creates a new, empty room owned by `owner_user_id`.
    #[must_use]
    pub fn new(code: String, owner_user_id: i64, owner_username: String, max_clients: usize) -> Self {
        let now = now_millis();
        Self {
            code,
            owner_user_id,
            owner_username,
            participants: Vec::new(),
            track: None,
            track_index: -1,
            state: PlayState::Stopped,
            position_anchor: 0.0,
            start_instant_ms: now,
            last_activity_ms: now,
            last_resync_ms: 0,
            max_clients,
        }
    }

    fn touch(&mut self) {
        self.last_activity_ms = now_millis();
    }

    /// Adds `participant` to the room.
    ///
    /// A prior session for the same user id is evicted first (its channel
    /// is closed) — invariant: at most one active session per
    /// `(room, user id)`. If the host slot is empty, the new participant
    /// becomes host; if the new participant *is* the room-owner, it becomes
    /// host unconditionally, demoting any current host (§4.2).
    pub fn add_participant(&mut self, mut participant: Participant) -> Result<(), PlaysyncError> {
        if let Some(existing) = self
            .participants
            .iter()
            .position(|p| p.user_id == participant.user_id)
        {
            let evicted = self.participants.remove(existing);
            evicted.channel.close();
        } else if self.participants.len() >= self.max_clients {
            return Err(PlaysyncError::Capacity(CapacityKind::RoomFull));
        }

        let is_owner = participant.user_id == self.owner_user_id;
        let host_missing = !self.participants.iter().any(|p| p.is_host);

        if is_owner {
            for p in &mut self.participants {
                p.is_host = false;
            }
            participant.is_host = true;
        } else if host_missing {
            participant.is_host = true;
        } else {
            participant.is_host = false;
        }

        self.participants.push(participant);
        self.touch();
        Ok(())
    }

    /// Removes the participant with the given session id.
    ///
    /// Returns `true` if the room is now empty. If the removed participant
    /// was host, a new host is chosen from the remaining participants
    /// (stable: the first remaining by join order). If the removed
    /// participant was the room-owner and the room is non-empty, ownership
    /// transfers to the new host in the same call (§4.2, §8 scenario S5).
    pub fn remove_participant(&mut self, session_id: &str) -> bool {
        let Some(idx) = self
            .participants
            .iter()
            .position(|p| p.session_id == session_id)
        else {
            return self.participants.is_empty();
        };
        let removed = self.participants.remove(idx);
        self.touch();

        if self.participants.is_empty() {
            return true;
        }

        if removed.is_host {
            let new_host = &mut self.participants[0];
            new_host.is_host = true;
            if removed.user_id == self.owner_user_id {
                self.owner_user_id = new_host.user_id;
                self.owner_username = new_host.username.clone();
            }
        }
        false
    }

    /// Removes a participant by user id (used by `kick`). Returns the
    /// removed participant's channel, if any, so the caller can notify and
    /// close it outside the room lock.
    pub fn remove_participant_by_user_id(
        &mut self,
        user_id: i64,
    ) -> Option<(Participant, bool)> {
        let idx = self.participants.iter().position(|p| p.user_id == user_id)?;
        let removed = self.participants.remove(idx);
        self.touch();

        let now_empty = self.participants.is_empty();
        if !now_empty && removed.is_host {
            let new_host = &mut self.participants[0];
            new_host.is_host = true;
            if removed.user_id == self.owner_user_id {
                self.owner_user_id = new_host.user_id;
                self.owner_username = new_host.username.clone();
            }
        }
        Some((removed, now_empty))
    }

    /// Installs new track metadata, resets to `STOPPED`, zeroes position.
    pub fn set_track(&mut self, meta: TrackMetadata, track_index: i64) {
        self.track = Some(meta);
        self.track_index = track_index;
        self.state = PlayState::Stopped;
        self.position_anchor = 0.0;
        self.touch();
    }

    /// Starts (or resumes) playback at `position`.
    pub fn play(&mut self, position: f64) {
        self.state = PlayState::Playing;
        self.position_anchor = position;
        self.start_instant_ms = now_millis();
        self.touch();
    }

    /// Pauses playback, collapsing the effective position into the anchor.
    /// Idempotent: calling twice in a row leaves the anchor unchanged the
    /// second time.
    pub fn pause(&mut self) -> f64 {
        if self.state == PlayState::Playing {
            self.position_anchor = self.effective_position();
            self.state = PlayState::Paused;
        }
        self.touch();
        self.position_anchor
    }

    /// Seeks to `position`. Refreshes `start_instant` if currently playing
    /// so the effective-position formula keeps holding from `position`.
    pub fn seek(&mut self, position: f64) {
        self.position_anchor = position;
        if self.state == PlayState::Playing {
            self.start_instant_ms = now_millis();
        }
        self.touch();
    }

    /// Effective playback position at the current instant, clamped to
    /// `[0, duration]` (§3 invariant 4).
    #[must_use]
    pub fn effective_position(&self) -> f64 {
        let raw = match self.state {
            PlayState::Playing => {
                let elapsed_ms = now_millis().saturating_sub(self.start_instant_ms);
                self.position_anchor + (elapsed_ms as f64 / 1000.0)
            }
            PlayState::Paused | PlayState::Stopped => self.position_anchor,
        };
        self.clamp_position(raw)
    }

    fn clamp_position(&self, position: f64) -> f64 {
        let duration = self.track.as_ref().map_or(f64::MAX, |t| t.duration);
        position.clamp(0.0, duration)
    }

    #[must_use]
    pub fn state(&self) -> PlayState {
        self.state
    }

    #[must_use]
    pub fn track(&self) -> Option<&TrackMetadata> {
        self.track.as_ref()
    }

    #[must_use]
    pub fn track_index(&self) -> i64 {
        self.track_index
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    #[must_use]
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    /// Host's channel, if a host is currently set.
    #[must_use]
    pub fn host_channel(&self) -> Option<Arc<dyn OutboundChannel>> {
        self.participants
            .iter()
            .find(|p| p.is_host)
            .map(|p| Arc::clone(&p.channel))
    }

    #[must_use]
    pub fn host_user_id(&self) -> Option<i64> {
        self.participants.iter().find(|p| p.is_host).map(|p| p.user_id)
    }

    /// Read-only snapshot of the participant roster.
    #[must_use]
    pub fn participant_views(&self) -> Vec<ParticipantView> {
        self.participants.iter().map(Participant::view).collect()
    }

    /// Snapshot of `(session_id, channel)` for every participant, used by
    /// the notifier to fan out without holding the room lock during I/O.
    #[must_use]
    pub fn participant_channels(&self) -> Vec<(String, Arc<dyn OutboundChannel>)> {
        self.participants
            .iter()
            .map(|p| (p.session_id.clone(), Arc::clone(&p.channel)))
            .collect()
    }

    /// Snapshot of `(session_id, channel)` for non-host participants, used
    /// by the sync controller's tick broadcast (§4.6).
    #[must_use]
    pub fn non_host_channels(&self) -> Vec<(String, Arc<dyn OutboundChannel>)> {
        self.participants
            .iter()
            .filter(|p| !p.is_host)
            .map(|p| (p.session_id.clone(), Arc::clone(&p.channel)))
            .collect()
    }

    #[must_use]
    pub fn find_by_session(&self, session_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.session_id == session_id)
    }

    #[must_use]
    pub fn find_by_user_id(&self, user_id: i64) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    /// True if `session_id` is both host and room-owner — the
    /// authorization predicate for `play`/`pause`/`seek`.
    #[must_use]
    pub fn is_host_and_owner(&self, session_id: &str) -> bool {
        self.find_by_session(session_id)
            .is_some_and(|p| p.is_host && p.user_id == self.owner_user_id)
    }

    /// True if `session_id` belongs to the room-owner — the authorization
    /// predicate for `kick`/`closeRoom`/`nextTrack`.
    #[must_use]
    pub fn is_owner(&self, session_id: &str) -> bool {
        self.find_by_session(session_id)
            .is_some_and(|p| p.user_id == self.owner_user_id)
    }

    /// Returns `true` and records `now` as the last resync instant if the
    /// drift-correction cooldown has elapsed, `false` otherwise. Used by the
    /// sync controller to rate-limit `forceResync` per room-wide activity;
    /// the connection layer additionally rate-limits per client.
    pub fn try_enter_resync_cooldown(&mut self, now_ms: u64, cooldown_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_resync_ms) < cooldown_ms {
            return false;
        }
        self.last_resync_ms = now_ms;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;

    fn make_participant(session_id: &str, user_id: i64) -> Participant {
        Participant {
            session_id: session_id.to_string(),
            user_id,
            username: format!("user{user_id}"),
            role: Role::User,
            is_host: false,
            joined_at: now_millis(),
            channel: Arc::new(RecordingChannel::new()),
        }
    }

    fn make_room(owner_id: i64) -> Room {
        Room::new("ABCDEF12".into(), owner_id, "owner".into(), 50)
    }

    #[test]
    fn first_participant_becomes_host_when_not_owner() {
        let mut room = make_room(999);
        room.add_participant(make_participant("s1", 100)).unwrap();
        assert!(room.find_by_session("s1").unwrap().is_host);
    }

    #[test]
    fn owner_becomes_host_unconditionally() {
        let mut room = make_room(100);
        room.add_participant(make_participant("s1", 200)).unwrap();
        assert!(room.find_by_session("s1").unwrap().is_host);

        room.add_participant(make_participant("s2", 100)).unwrap();
        assert!(room.find_by_session("s2").unwrap().is_host);
        assert!(!room.find_by_session("s1").unwrap().is_host);
    }

    #[test]
    fn duplicate_user_id_evicts_prior_session() {
        let mut room = make_room(999);
        room.add_participant(make_participant("s1", 100)).unwrap();
        room.add_participant(make_participant("s2", 100)).unwrap();
        assert_eq!(room.participant_count(), 1);
        assert!(room.find_by_session("s1").is_none());
        assert!(room.find_by_session("s2").is_some());
    }

    #[test]
    fn room_full_rejects_new_participant() {
        let mut room = Room::new("CODE0001".into(), 999, "owner".into(), 1);
        room.add_participant(make_participant("s1", 100)).unwrap();
        let err = room.add_participant(make_participant("s2", 200)).unwrap_err();
        assert_eq!(err.code(), "room_full");
    }

    #[test]
    fn removing_host_promotes_remaining_participant() {
        let mut room = make_room(100);
        room.add_participant(make_participant("s1", 100)).unwrap(); // owner/host
        room.add_participant(make_participant("s2", 200)).unwrap();
        room.add_participant(make_participant("s3", 300)).unwrap();

        let now_empty = room.remove_participant("s1");
        assert!(!now_empty);
        let new_host = room.host_user_id().unwrap();
        assert!(new_host == 200 || new_host == 300);
        assert_eq!(room.owner_user_id, new_host);
    }

    #[test]
    fn removing_last_participant_reports_empty() {
        let mut room = make_room(100);
        room.add_participant(make_participant("s1", 100)).unwrap();
        assert!(room.remove_participant("s1"));
    }

    #[test]
    fn play_pause_play_round_trip_sets_new_anchor() {
        let mut room = make_room(100);
        room.play(10.0);
        let paused_at = room.pause();
        assert!((paused_at - 10.0).abs() < 0.05);
        room.play(20.0);
        assert_eq!(room.state(), PlayState::Playing);
    }

    #[test]
    fn pause_is_idempotent() {
        let mut room = make_room(100);
        room.play(5.0);
        let first = room.pause();
        let second = room.pause();
        assert_eq!(first, second);
    }

    #[test]
    fn effective_position_advances_while_playing() {
        let mut room = make_room(100);
        room.play(0.0);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(room.effective_position() > 0.0);
    }

    #[test]
    fn effective_position_clamped_to_duration() {
        let mut room = make_room(100);
        room.set_track(
            TrackMetadata {
                audio_id: 1,
                owner_id: 100,
                audio_uuid: "u".into(),
                filename: "f".into(),
                title: "t".into(),
                artist: "a".into(),
                duration: 30.0,
                qualities: vec!["hi".into()],
            },
            0,
        );
        room.play(29.99);
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(room.effective_position() <= 30.0);
    }

    #[test]
    fn set_track_resets_to_stopped_and_zero_position() {
        let mut room = make_room(100);
        room.play(15.0);
        room.set_track(
            TrackMetadata {
                audio_id: 2,
                owner_id: 100,
                audio_uuid: "u2".into(),
                filename: "f2".into(),
                title: "t2".into(),
                artist: "a2".into(),
                duration: 60.0,
                qualities: vec![],
            },
            1,
        );
        assert_eq!(room.state(), PlayState::Stopped);
        assert_eq!(room.effective_position(), 0.0);
    }

    #[test]
    fn is_host_and_owner_requires_both() {
        let mut room = make_room(100);
        room.add_participant(make_participant("s1", 100)).unwrap();
        room.add_participant(make_participant("s2", 200)).unwrap();
        assert!(room.is_host_and_owner("s1"));
        assert!(!room.is_host_and_owner("s2"));
    }

    #[test]
    fn resync_cooldown_blocks_repeated_corrections() {
        let mut room = make_room(100);
        assert!(room.try_enter_resync_cooldown(1_000, 5_000));
        assert!(!room.try_enter_resync_cooldown(3_000, 5_000));
        assert!(room.try_enter_resync_cooldown(6_001, 5_000));
    }

    #[test]
    fn kick_by_user_id_transfers_ownership_when_owner_kicked_is_impossible_but_host_kicked_promotes()
    {
        let mut room = make_room(100);
        room.add_participant(make_participant("s1", 100)).unwrap();
        room.add_participant(make_participant("s2", 200)).unwrap();
        let (_removed, now_empty) = room.remove_participant_by_user_id(200).unwrap();
        assert!(!now_empty);
        assert!(room.find_by_user_id(100).unwrap().is_host);
    }
}
