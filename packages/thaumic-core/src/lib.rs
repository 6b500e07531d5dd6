//! playsync-core - shared library for the playsync realtime synchronized
//! playback server.
//!
//! This crate holds every piece of the realtime sync surface that doesn't
//! depend on the audio pipeline, the relational store, or the auth layer
//! fronting it: the per-room playback state machine, the room directory,
//! the wire protocol, the connection-level safety nets, and the WebSocket
//! admission/dispatch layer built on top of them.
//!
//! # Architecture
//!
//! - [`room`]: per-room playback state machine (C2)
//! - [`manager`]: directory of live rooms, connection-count caps (C3)
//! - [`connection`]: the production outbound channel and per-connection
//!   rate limiters (C4)
//! - [`api::ws`]: the dispatcher — one handler per client message (C5)
//! - [`sync`]: the 1 Hz drift-correction tick and status-report handling (C6)
//! - [`api::http`]: the admission layer — origin policy, auth, connection
//!   caps, router construction (C7)
//! - [`notifier`]: broadcast helpers shared by the dispatcher and sweeper (C8)
//! - [`collaborators`]: trait-at-the-seam contracts for the external auth
//!   and persistence layers (§6.2)
//! - [`config`]: merged, validated runtime configuration (C9)
//! - [`error`]: centralized error types (C10)
//! - [`bootstrap`]: composition root and background task wiring (C11)

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod channel;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod notifier;
pub mod protocol;
pub mod protocol_constants;
pub mod ratelimit;
pub mod room;
pub mod sync;
pub mod validation;

pub use api::{start_server, AppState, AppStateBuilder, ServerError};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use channel::{OutboundChannel, RecordingChannel, SendError};
pub use clock::{now_millis, Clock, FixedClock, SystemClock};
pub use collaborators::{
    AuthProvider, AuthenticatedUser, InMemoryPersistence, NoopAuthProvider, PersistenceProvider,
    PlaylistItem,
};
pub use config::Config;
pub use connection::{ConnectionLimiters, WsChannel};
pub use error::{CapacityKind, ErrorCode, PlaysyncError, PlaysyncResult, RateLimitKind};
pub use manager::{ConnectionSlot, Manager, SharedRoom};
pub use protocol::{ParticipantView, Role, TrackMetadata, WsIncoming, WsOutgoing};
pub use room::{Participant, PlayState, Room};
