//! Fixed constants for the realtime sync protocol.
//!
//! Grouped by concern; values are the defaults baked into the binary and are
//! all independently overridable through [`crate::config::Config`].

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Name advertised in logs and default config comments.
pub const APP_NAME: &str = "playsync";

// ─────────────────────────────────────────────────────────────────────────────
// Scheduled-start / clock sync
// ─────────────────────────────────────────────────────────────────────────────

/// Propagation slack added to every `play`/`seek` broadcast's `scheduledAt`.
///
/// Clients that receive the message before this deadline wait for it;
/// clients that receive it late seek forward by the overshoot.
pub const START_DELAY_MS: u64 = 800;

/// Drift beyond which the sync controller force-corrects a client.
///
/// Clients self-correct drift under this threshold via playback-rate
/// nudging; this is the server backstop.
pub const DRIFT_THRESHOLD_MS: u64 = 500;

/// Minimum spacing between two `forceResync` corrections sent to the same
/// client, so a persistently-lagging client is nudged rather than spammed.
pub const DRIFT_CORRECTION_COOLDOWN_SECS: u64 = 5;

/// Interval of the per-room position broadcast ("tick") sent to non-host
/// participants.
pub const SYNC_TICK_INTERVAL_SECS: u64 = 1;

/// Per-client cap on accepted `statusReport` frames.
pub const STATUS_REPORT_RATE_LIMIT_PER_SEC: u32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Room lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Interval of the idle-room sweep.
pub const SWEEPER_INTERVAL_SECS: u64 = 300;

/// A room with no activity for this long is removed by the sweeper.
pub const ROOM_IDLE_TIMEOUT_SECS: u64 = 1800;

/// Number of times `generate_code` retries on a collision before giving up.
pub const ROOM_CODE_GENERATION_RETRIES: u32 = 5;

/// Length in characters of a generated room code.
pub const ROOM_CODE_LEN: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Connection / resource caps
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum size of a single inbound WebSocket frame.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Interval at which the server pings an idle connection.
pub const WS_PING_INTERVAL_SECS: u64 = 10;

/// A connection that misses a pong for this long is dropped.
pub const WS_READ_DEADLINE_SECS: u64 = 30;

/// Write deadline applied to a single ping frame.
pub const WS_PING_WRITE_DEADLINE_SECS: u64 = 5;

/// Default global cap on simultaneously live rooms.
pub const MAX_ROOMS: usize = 500;

/// Default cap on rooms owned by a single user at once.
pub const MAX_ROOMS_PER_USER: usize = 5;

/// Default cap on participants in a single room.
pub const MAX_CLIENTS_PER_ROOM: usize = 50;

/// Default cap on simultaneous connections held by a single user.
pub const MAX_CONNECTIONS_PER_USER: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Rate limiting (sliding windows, 1-second granularity unless noted)
// ─────────────────────────────────────────────────────────────────────────────

/// Per-connection cap on `ping` frames within one window.
pub const RATE_LIMIT_PING_PER_SEC: u32 = 5;

/// Per-connection cap on non-ping frames within one window.
pub const RATE_LIMIT_MESSAGES_PER_SEC: u32 = 20;

/// Per-connection combined cap across ping and non-ping frames.
pub const RATE_LIMIT_COMBINED_PER_SEC: u32 = 25;

/// Window used by the per-connection message rate limiters.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 1;

/// Window used by the IP-keyed join-attempt limiter.
pub const JOIN_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Max join attempts from one IP within the window.
pub const JOIN_RATE_LIMIT_MAX_ATTEMPTS: u32 = 10;

/// Hard cap on distinct keys tracked by a rate-limit store before the
/// oldest-10% eviction pass runs.
pub const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;

/// Interval of the background sweep that prunes rate-limit entries whose
/// window has fully elapsed, independent of the eviction-on-insert path.
pub const RATE_LIMIT_SWEEP_INTERVAL_SECS: u64 = 600;
