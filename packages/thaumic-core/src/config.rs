//! Process-wide configuration for the sync core.
//!
//! [`Config`] is the merged, validated result of the three-layer precedence
//! chain (defaults → YAML file → environment → CLI flags) that the binary
//! crate assembles in `playsync-server`'s own `config` module. The core only
//! ever sees the merged, validated value.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::error::PlaysyncError;
use crate::protocol_constants::{
    DRIFT_CORRECTION_COOLDOWN_SECS, DRIFT_THRESHOLD_MS, JOIN_RATE_LIMIT_MAX_ATTEMPTS,
    JOIN_RATE_LIMIT_WINDOW_SECS, MAX_CLIENTS_PER_ROOM, MAX_CONNECTIONS_PER_USER, MAX_FRAME_BYTES,
    MAX_RATE_LIMIT_ENTRIES, MAX_ROOMS, MAX_ROOMS_PER_USER, RATE_LIMIT_COMBINED_PER_SEC,
    RATE_LIMIT_MESSAGES_PER_SEC, RATE_LIMIT_PING_PER_SEC, RATE_LIMIT_SWEEP_INTERVAL_SECS,
    RATE_LIMIT_WINDOW_SECS, ROOM_IDLE_TIMEOUT_SECS, START_DELAY_MS, SWEEPER_INTERVAL_SECS,
    SYNC_TICK_INTERVAL_SECS, WS_PING_INTERVAL_SECS, WS_READ_DEADLINE_SECS,
};

/// Resource caps and timing knobs, bundled so every component that reads a
/// cap reads it from the same merged, validated value.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address and port the HTTP/WebSocket listener binds to.
    pub bind_addr: SocketAddr,
    /// Hosts allowed in the `Origin` header of a WebSocket upgrade. Empty
    /// means permissive (any origin, beyond the always-allowed localhost).
    pub allowed_origins: Vec<String>,
    /// Parent directory of per-room transient scratch areas
    /// (`<data_dir>/rooms/<code>`).
    pub data_dir: PathBuf,
    /// Global cap on simultaneously live rooms.
    pub max_rooms: usize,
    /// Cap on rooms owned by a single user at once.
    pub max_rooms_per_user: usize,
    /// Cap on participants in a single room.
    pub max_clients_per_room: usize,
    /// Cap on simultaneous connections held by a single user.
    pub max_connections_per_user: usize,
    /// Per-connection ping-frame rate limit (per second).
    pub rate_limit_ping_per_sec: u32,
    /// Per-connection non-ping message rate limit (per second).
    pub rate_limit_messages_per_sec: u32,
    /// Per-connection combined rate limit (per second).
    pub rate_limit_combined_per_sec: u32,
    /// Sliding window used by the per-connection rate limiters.
    pub rate_limit_window_secs: u64,
    /// Sliding window for the IP-keyed join limiter.
    pub join_rate_limit_window_secs: u64,
    /// Max join attempts within the window, per IP.
    pub join_rate_limit_max_attempts: u32,
    /// Hard cap on distinct keys a rate-limit store tracks before the
    /// oldest-10% eviction pass runs.
    pub max_rate_limit_entries: usize,
    /// Interval of the background sweep that prunes fully-elapsed
    /// rate-limit entries.
    pub rate_limit_sweep_interval_secs: u64,
    /// Interval of the idle-room sweeper.
    pub sweeper_interval_secs: u64,
    /// A room idle for longer than this is removed by the sweeper.
    pub room_idle_timeout_secs: u64,
    /// Interval of the 1 Hz per-room position tick.
    pub sync_tick_interval_secs: u64,
    /// Propagation slack added to `scheduledAt` on `play`/`seek` broadcasts.
    pub start_delay_ms: u64,
    /// Drift beyond which the sync controller force-corrects a client.
    pub drift_threshold_ms: u64,
    /// Minimum spacing between two `forceResync` corrections in one room.
    pub drift_correction_cooldown_secs: u64,
    /// Maximum size of a single inbound WebSocket frame.
    pub max_frame_bytes: usize,
    /// Interval at which the server pings an idle connection.
    pub ws_ping_interval_secs: u64,
    /// A connection that misses a pong for this long is dropped.
    pub ws_read_deadline_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), 49400),
            allowed_origins: Vec::new(),
            data_dir: PathBuf::from("./data"),
            max_rooms: MAX_ROOMS,
            max_rooms_per_user: MAX_ROOMS_PER_USER,
            max_clients_per_room: MAX_CLIENTS_PER_ROOM,
            max_connections_per_user: MAX_CONNECTIONS_PER_USER,
            rate_limit_ping_per_sec: RATE_LIMIT_PING_PER_SEC,
            rate_limit_messages_per_sec: RATE_LIMIT_MESSAGES_PER_SEC,
            rate_limit_combined_per_sec: RATE_LIMIT_COMBINED_PER_SEC,
            rate_limit_window_secs: RATE_LIMIT_WINDOW_SECS,
            join_rate_limit_window_secs: JOIN_RATE_LIMIT_WINDOW_SECS,
            join_rate_limit_max_attempts: JOIN_RATE_LIMIT_MAX_ATTEMPTS,
            max_rate_limit_entries: MAX_RATE_LIMIT_ENTRIES,
            rate_limit_sweep_interval_secs: RATE_LIMIT_SWEEP_INTERVAL_SECS,
            sweeper_interval_secs: SWEEPER_INTERVAL_SECS,
            room_idle_timeout_secs: ROOM_IDLE_TIMEOUT_SECS,
            sync_tick_interval_secs: SYNC_TICK_INTERVAL_SECS,
            start_delay_ms: START_DELAY_MS,
            drift_threshold_ms: DRIFT_THRESHOLD_MS,
            drift_correction_cooldown_secs: DRIFT_CORRECTION_COOLDOWN_SECS,
            max_frame_bytes: MAX_FRAME_BYTES,
            ws_ping_interval_secs: WS_PING_INTERVAL_SECS,
            ws_read_deadline_secs: WS_READ_DEADLINE_SECS,
        }
    }
}

impl Config {
    /// Validates the merged configuration, failing startup descriptively
    /// rather than running half-configured.
    pub fn validate(&self) -> Result<(), PlaysyncError> {
        if self.max_rooms == 0 {
            return Err(PlaysyncError::Internal(
                "max_rooms must be positive".into(),
            ));
        }
        if self.max_rooms_per_user == 0 {
            return Err(PlaysyncError::Internal(
                "max_rooms_per_user must be positive".into(),
            ));
        }
        if self.max_clients_per_room == 0 {
            return Err(PlaysyncError::Internal(
                "max_clients_per_room must be positive".into(),
            ));
        }
        if self.max_connections_per_user == 0 {
            return Err(PlaysyncError::Internal(
                "max_connections_per_user must be positive".into(),
            ));
        }
        if self.sync_tick_interval_secs == 0 {
            return Err(PlaysyncError::Internal(
                "sync_tick_interval_secs must be positive".into(),
            ));
        }
        if self.room_idle_timeout_secs == 0 {
            return Err(PlaysyncError::Internal(
                "room_idle_timeout_secs must be positive".into(),
            ));
        }
        for origin in &self.allowed_origins {
            if origin.trim().is_empty() {
                return Err(PlaysyncError::Internal(
                    "allowed_origins entries must not be blank".into(),
                ));
            }
        }
        Ok(())
    }

    /// Returns the scratch directory for a given room code
    /// (`<data_dir>/rooms/<code>`).
    #[must_use]
    pub fn room_scratch_dir(&self, room_code: &str) -> PathBuf {
        self.data_dir.join("rooms").join(room_code)
    }

    /// Removes a room's transient scratch directory, if any (§4.4, §4.5,
    /// §6.4). Called on every room-destruction path: empty-on-disconnect,
    /// `closeRoom`, and the idle sweeper. A missing directory (nothing was
    /// ever written there) is not an error.
    pub async fn cleanup_room_scratch_dir(&self, room_code: &str) {
        let dir = self.room_scratch_dir(room_code);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("failed to clean up scratch dir {}: {err}", dir.display()),
        }
    }
}
