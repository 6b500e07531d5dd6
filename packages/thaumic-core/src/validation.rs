//! Shared input validation for position-bearing messages (§4.5, §4.6).
//!
//! `play`, `seek`, and `statusReport` all carry a client-supplied `position`
//! in seconds; each validates it the same way before touching room state, so
//! the rule lives here once instead of being re-derived at each call site.

use crate::error::PlaysyncError;

/// Validates a client-supplied playback position.
///
/// Rejects non-finite and negative values unconditionally. When `duration`
/// is known (the room has a current track), also rejects positions more
/// than one second past the end of the track — a small tolerance for
/// clients that round up to the track length rather than clamp below it.
pub fn validate_position(position: f64, duration: Option<f64>) -> Result<(), PlaysyncError> {
    if !position.is_finite() {
        return Err(PlaysyncError::Validation("position must be finite".into()));
    }
    if position < 0.0 {
        return Err(PlaysyncError::Validation("position must not be negative".into()));
    }
    if let Some(duration) = duration {
        if position > duration + 1.0 {
            return Err(PlaysyncError::Validation(
                "position is past the end of the current track".into(),
            ));
        }
    }
    Ok(())
}

/// Validates a client-supplied playlist track index.
///
/// The core never knows the playlist length itself (that lives with the
/// persistence layer) — it only rejects the values that could never be a
/// valid index, leaving "index out of range for this playlist" to the
/// caller once it has resolved the playlist.
pub fn validate_track_index(track_index: i64) -> Result<(), PlaysyncError> {
    if track_index < 0 {
        return Err(PlaysyncError::Validation("track index must not be negative".into()));
    }
    Ok(())
}
