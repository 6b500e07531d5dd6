//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the core's
//! manager/room/notifier/sync types. It provides the router construction and
//! server startup functionality.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{AuthProvider, PersistenceProvider};
use crate::config::Config;
use crate::manager::Manager;
use crate::protocol_constants::{JOIN_RATE_LIMIT_MAX_ATTEMPTS, JOIN_RATE_LIMIT_WINDOW_SECS, MAX_RATE_LIMIT_ENTRIES};
use crate::ratelimit::KeyedSlidingWindow;

pub mod http;
pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin wrapper that holds references to the core's services. All
/// business logic lives in the services themselves (`Manager`, `Room`,
/// `sync`, `notifier`).
#[derive(Clone)]
pub struct AppState {
    /// Directory of live rooms.
    pub manager: Arc<Manager>,
    /// Merged, validated configuration.
    pub config: Arc<Config>,
    /// External identity resolver, injected by the binary crate.
    pub auth: Arc<dyn AuthProvider>,
    /// External playlist/track lookup, injected by the binary crate.
    pub persistence: Arc<dyn PersistenceProvider>,
    /// IP-keyed join-attempt limiter (§4.7).
    pub join_limiter: Arc<KeyedSlidingWindow>,
    /// Cancelled on graceful shutdown; handed to every connection so a
    /// shutdown closes every open socket.
    pub cancel_token: CancellationToken,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    manager: Option<Arc<Manager>>,
    config: Option<Arc<Config>>,
    auth: Option<Arc<dyn AuthProvider>>,
    persistence: Option<Arc<dyn PersistenceProvider>>,
    join_limiter: Option<Arc<KeyedSlidingWindow>>,
    cancel_token: Option<CancellationToken>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the room directory.
    #[must_use]
    pub fn manager(mut self, manager: Arc<Manager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Sets the merged configuration.
    #[must_use]
    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the auth collaborator.
    #[must_use]
    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the persistence collaborator.
    #[must_use]
    pub fn persistence(mut self, persistence: Arc<dyn PersistenceProvider>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Sets the join-attempt limiter. Defaults to one sized from `Config` if
    /// left unset at `build()` time.
    #[must_use]
    pub fn join_limiter(mut self, join_limiter: Arc<KeyedSlidingWindow>) -> Self {
        self.join_limiter = Some(join_limiter);
        self
    }

    /// Sets the shutdown cancellation token.
    #[must_use]
    pub fn cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    #[must_use]
    pub fn build(self) -> AppState {
        let config = self.config.expect("config is required");
        let join_limiter = self.join_limiter.unwrap_or_else(|| {
            Arc::new(KeyedSlidingWindow::new(
                JOIN_RATE_LIMIT_MAX_ATTEMPTS,
                JOIN_RATE_LIMIT_WINDOW_SECS * 1000,
                MAX_RATE_LIMIT_ENTRIES,
            ))
        });
        AppState {
            manager: self.manager.expect("manager is required"),
            auth: self.auth.expect("auth is required"),
            persistence: self.persistence.expect("persistence is required"),
            join_limiter,
            cancel_token: self.cancel_token.unwrap_or_default(),
            config,
        }
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    #[must_use]
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Starts the HTTP/WebSocket server on `state.config.bind_addr`.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = state.config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("playsync server listening on {addr}");

    let app = http::create_router(state.clone());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state.cancel_token))
    .await?;
    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    cancel_token.cancelled().await;
    log::info!("playsync server shutting down");
}
