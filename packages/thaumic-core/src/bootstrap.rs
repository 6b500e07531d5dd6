//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::clock::now_millis;
use crate::config::Config;
use crate::manager::Manager;
use crate::notifier;
use crate::protocol::WsOutgoing;
use crate::ratelimit::KeyedSlidingWindow;
use crate::sync::run_sync_tick_loop;

/// Container for all bootstrapped services.
///
/// Consumed by `AppState` to build the final application state; the auth
/// and persistence collaborators are deliberately not wired here (§6.2) —
/// the binary crate injects its own implementations directly into
/// `AppState::builder()`.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Directory of live rooms.
    pub manager: Arc<Manager>,
    /// Merged, validated configuration.
    pub config: Arc<Config>,
    /// IP-keyed join-attempt limiter (§4.7).
    pub join_limiter: Arc<KeyedSlidingWindow>,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Spawns the sync tick loop (C6) and the idle-room sweeper (§4.3),
    /// both tied to `cancel_token`.
    pub fn spawn_background_tasks(&self) {
        tokio::spawn(run_sync_tick_loop(
            Arc::clone(&self.manager),
            self.cancel_token.clone(),
        ));
        tokio::spawn(run_idle_sweep_loop(
            Arc::clone(&self.manager),
            Arc::clone(&self.config),
            self.join_limiter.clone(),
            self.cancel_token.clone(),
        ));
    }

    /// Initiates graceful shutdown: cancels the token shared by every
    /// background task and open connection.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] beginning graceful shutdown");
        self.cancel_token.cancel();
        log::info!("[Bootstrap] shutdown signal sent");
    }
}

/// Periodically evicts rooms idle past `room_idle_timeout_secs` and sweeps
/// fully-elapsed join-limiter entries (§4.3, §3), notifying and closing
/// evicted rooms' participants outside any lock.
async fn run_idle_sweep_loop(
    manager: Arc<Manager>,
    config: Arc<Config>,
    join_limiter: Arc<KeyedSlidingWindow>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.sweeper_interval_secs));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("idle sweep loop shutting down");
                return;
            }
            _ = ticker.tick() => {
                let now = now_millis();
                let stale = manager.sweep_idle(now, config.room_idle_timeout_secs);
                for room in &stale {
                    log::info!("sweeping idle room {}", room.read().code);
                }
                for room in &stale {
                    notifier::broadcast_and_close(
                        room,
                        Some(&WsOutgoing::RoomClosed { server_time: now }),
                    )
                    .await;
                    let code = room.read().code.clone();
                    config.cleanup_room_scratch_dir(&code).await;
                }
                join_limiter.sweep_expired(now);
            }
        }
    }
}

/// Wires the core's services from a merged configuration. Never fails: a
/// `Manager`, a rate-limit store, and a cancellation token have no fallible
/// dependencies to fail against.
#[must_use]
pub fn bootstrap_services(config: Arc<Config>) -> BootstrappedServices {
    let manager = Arc::new(Manager::new(
        config.max_rooms,
        config.max_rooms_per_user,
        config.max_connections_per_user,
    ));
    let join_limiter = Arc::new(KeyedSlidingWindow::new(
        config.join_rate_limit_max_attempts,
        config.join_rate_limit_window_secs * 1000,
        config.max_rate_limit_entries,
    ));
    let cancel_token = CancellationToken::new();

    BootstrappedServices {
        manager,
        config,
        join_limiter,
        cancel_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_wires_manager_from_config_caps() {
        let mut config = Config::default();
        config.max_rooms = 7;
        let services = bootstrap_services(Arc::new(config));
        assert_eq!(services.manager.room_count(), 0);
    }
}
