//! Centralized error types for the playback-sync core library.
//!
//! One enum is the single source of truth for every failure kind the
//! connection, dispatcher, and admission layer can produce. Construction
//! sites never hand-format error strings; they build a variant and let the
//! mapping below produce either an outbound `error` WebSocket frame or an
//! HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the sync server.
#[derive(Debug, Error, Clone, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum PlaysyncError {
    /// Caller lacks the role or host/owner relationship a command requires.
    #[error("{0}")]
    Authorization(String),

    /// A resource cap (room, per-user rooms, per-room clients, per-user
    /// connections) was hit.
    #[error("{0}")]
    Capacity(CapacityKind),

    /// Malformed frame, non-finite/out-of-range position, unknown track
    /// index, or an oversize frame.
    #[error("{0}")]
    Validation(String),

    /// Unknown room code, or unknown track id on `nextTrack`.
    #[error("{0}")]
    NotFound(String),

    /// A sliding-window rate limit was exceeded.
    #[error("{0}")]
    RateLimit(RateLimitKind),

    /// Unexpected failure in an external collaborator (persistence, auth).
    #[error("{0}")]
    Internal(String),
}

/// Which cap was exceeded, carried so the dispatcher can decide between an
/// `error` frame and an HTTP `429` without re-deriving the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapacityKind {
    /// Room already holds `MAX_CLIENTS_PER_ROOM` participants.
    RoomFull,
    /// Requesting owner already owns `MAX_ROOMS_PER_USER` rooms.
    UserMaxRooms,
    /// The directory already holds `MAX_ROOMS` rooms.
    GlobalMaxRooms,
    /// Requesting user already holds `MAX_CONNECTIONS_PER_USER` connections.
    UserMaxConnections,
}

impl std::fmt::Display for CapacityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::RoomFull => "Room is full",
            Self::UserMaxRooms => "You already own the maximum number of rooms",
            Self::GlobalMaxRooms => "The server has reached its room capacity",
            Self::UserMaxConnections => "Too many active connections for this account",
        };
        write!(f, "{msg}")
    }
}

/// Which rate limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitKind {
    /// IP-keyed join-attempt limiter.
    JoinFlood,
    /// Per-connection message-flood limiter (ping, normal, or combined cap).
    MessageFlood,
}

impl std::fmt::Display for RateLimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::JoinFlood => "Too many join attempts, try again later",
            Self::MessageFlood => "Too many messages, connection closed",
        };
        write!(f, "{msg}")
    }
}

impl PlaysyncError {
    /// Returns a machine-readable error code for API responses and for the
    /// outbound `error` frame's `code` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authorization(_) => "authorization",
            Self::Capacity(CapacityKind::RoomFull) => "room_full",
            Self::Capacity(CapacityKind::UserMaxRooms) => "user_max_rooms",
            Self::Capacity(CapacityKind::GlobalMaxRooms) => "global_max_rooms",
            Self::Capacity(CapacityKind::UserMaxConnections) => "user_max_connections",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::RateLimit(RateLimitKind::JoinFlood) => "join_rate_limited",
            Self::RateLimit(RateLimitKind::MessageFlood) => "message_rate_limited",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an HTTP status code, for the admission-time call
    /// sites that can still answer with a plain HTTP response (rejection
    /// before the WebSocket upgrade completes).
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::Capacity(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True if this failure should close the connection rather than just
    /// notify the sender with an `error` frame.
    ///
    /// Only the message-flood case and oversize frames terminate the
    /// connection; everything else leaves the sender connected (§7).
    pub fn terminates_connection(&self) -> bool {
        matches!(self, Self::RateLimit(RateLimitKind::MessageFlood))
    }
}

impl ErrorCode for PlaysyncError {
    fn code(&self) -> &'static str {
        PlaysyncError::code(self)
    }
}

/// Convenient Result alias for application-wide operations.
pub type PlaysyncResult<T> = Result<T, PlaysyncError>;

/// JSON response body for HTTP error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for PlaysyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
