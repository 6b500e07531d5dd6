//! Wire protocol for the realtime sync channel.
//!
//! One tagged record type for everything a client can send, one for
//! everything the server can send. The dispatcher (`api::ws`) matches on
//! [`WsIncoming`] once per frame; nothing downstream re-parses a `type`
//! string.

use serde::{Deserialize, Serialize};

/// A participant's role, supplied by the external auth layer on upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular listener; may join rooms but not create them.
    User,
    /// May create rooms in addition to joining them.
    Admin,
    /// The user id that created the current room; always becomes host.
    Owner,
}

impl Role {
    /// True for roles allowed to send `create`.
    #[must_use]
    pub fn can_create_room(self) -> bool {
        matches!(self, Role::Admin | Role::Owner)
    }
}

/// Immutable snapshot of what a room is currently playing.
///
/// Supplied by the persistence layer at track-change time and cached on the
/// room until the next change; quality names are opaque strings the core
/// never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub audio_id: i64,
    pub owner_id: i64,
    pub audio_uuid: String,
    pub filename: String,
    pub title: String,
    pub artist: String,
    pub duration: f64,
    pub qualities: Vec<String>,
}

/// A participant as rendered to clients in room snapshots and roster
/// updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantView {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "uid")]
    pub user_id: i64,
    pub username: String,
    #[serde(rename = "isHost")]
    pub is_host: bool,
}

/// Messages a client may send over the realtime channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WsIncoming {
    /// Create a new room with the caller as owner. Requires role
    /// `admin`/`owner`.
    Create,
    /// Join an existing room by its short code.
    Join { room_code: String },
    /// Heartbeat/clock-offset probe; echoes `client_time` back with
    /// `server_time`.
    Ping { client_time: u64 },
    /// Start (or resume) playback at `position` seconds. Host+owner only.
    Play { position: f64 },
    /// Pause playback. Host+owner only.
    Pause,
    /// Seek to `position` seconds without changing play state. Host+owner
    /// only.
    Seek { position: f64 },
    /// Evict another participant by session id. Room-owner only.
    Kick { target_session_id: String },
    /// Close the room for everyone. Room-owner only.
    CloseRoom,
    /// Switch the room's current track to playlist index `track_index`.
    /// Room-owner only.
    NextTrack { track_index: i64 },
    /// Periodic self-reported playback position from a non-host client,
    /// used by the sync controller to detect and correct drift.
    StatusReport { track_index: i64, position: f64 },
}

/// Messages the server may send over the realtime channel.
///
/// Every variant is tagged `type`; `server_time` is stamped once at
/// construction from a single clock read, per §4.1.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WsOutgoing {
    /// Reply to `create`: caller is now the host of a freshly created room.
    Created {
        room_code: String,
        is_host: bool,
        users: Vec<ParticipantView>,
        server_time: u64,
    },
    /// Reply to `join`: caller has joined an existing room.
    Joined {
        room_code: String,
        is_host: bool,
        users: Vec<ParticipantView>,
        server_time: u64,
    },
    /// Reply to `ping`.
    Pong { client_time: u64, server_time: u64 },
    /// Playback started/resumed. Carries `scheduled_at` so every client
    /// begins audio at the same wall-clock instant.
    Play {
        position: f64,
        server_time: u64,
        scheduled_at: u64,
        track: Option<TrackMetadata>,
    },
    /// Playback paused at `position`. No `scheduled_at` — pausing is
    /// immediate, there is nothing to schedule.
    Pause { position: f64, server_time: u64 },
    /// Seeked to `position` without changing play state.
    Seek {
        position: f64,
        server_time: u64,
        scheduled_at: u64,
        track: Option<TrackMetadata>,
    },
    /// Sent to an evicted participant just before its connection is closed.
    Kicked { server_time: u64 },
    /// Sent to every participant when the room-owner closes the room.
    RoomClosed { server_time: u64 },
    /// The room's current track changed.
    TrackChange {
        track_index: i64,
        track: TrackMetadata,
        server_time: u64,
    },
    /// The external playlist backing this room changed; opaque payload
    /// passed through from the persistence layer.
    PlaylistUpdate { server_time: u64 },
    /// A new participant joined.
    UserJoined {
        user: ParticipantView,
        client_count: usize,
        server_time: u64,
    },
    /// A participant left (disconnect or kick).
    UserLeft {
        session_id: String,
        client_count: usize,
        server_time: u64,
    },
    /// Sent to the new host after the previous host/owner departs.
    HostTransfer { is_host: bool, server_time: u64 },
    /// 1 Hz position broadcast to non-host participants.
    SyncTick { position: f64, server_time: u64 },
    /// Server-issued correction: jump to the server's effective position.
    ForceResync { position: f64, server_time: u64 },
    /// Server-issued correction: the client reported the wrong track.
    ForceTrack {
        track_index: i64,
        position: f64,
        track: TrackMetadata,
        server_time: u64,
    },
    /// A recoverable failure. The sender remains connected unless the
    /// accompanying `PlaysyncError::terminates_connection()` says otherwise.
    Error {
        code: &'static str,
        error: String,
        server_time: u64,
    },
}
