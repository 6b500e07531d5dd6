//! Server configuration.
//!
//! Loads from an optional YAML file, then environment variable overrides —
//! the two lowest layers of the three-layer precedence chain `playsync_core`
//! describes for its merged `Config` (defaults → YAML → environment → CLI
//! flags). CLI flags are the highest-precedence layer and are applied by
//! `main.rs` directly onto the `playsync_core::Config` this module produces.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use playsync_core::Config as CoreConfig;
use serde::Deserialize;

/// Overridable server settings, loaded from YAML with environment overrides.
///
/// Every field is optional so a partial YAML file (or none at all) leaves
/// the rest at the core's compiled-in defaults — `None` here means "not yet
/// set by this layer", not "unset deliberately".
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Override: `BIND_HOST`
    pub bind_host: Option<IpAddr>,
    /// Override: `BIND_PORT`
    pub bind_port: Option<u16>,
    /// Override: `ALLOWED_ORIGINS` (comma-separated)
    pub allowed_origins: Option<Vec<String>>,
    /// Override: `DATA_DIR`
    pub data_dir: Option<PathBuf>,
    /// Shared secret used to verify bearer credentials.
    /// Override: `JWT_SECRET`
    pub jwt_secret: Option<String>,
    pub max_rooms: Option<usize>,
    pub max_rooms_per_user: Option<usize>,
    pub max_clients_per_room: Option<usize>,
    pub max_connections_per_user: Option<usize>,
    pub room_idle_timeout_secs: Option<u64>,
    pub sweeper_interval_secs: Option<u64>,
}

impl ServerConfig {
    /// Loads the YAML layer (or compiled-in defaults if no path is given),
    /// then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BIND_HOST") {
            if let Ok(ip) = val.parse() {
                self.bind_host = Some(ip);
            }
        }
        if let Ok(val) = std::env::var("BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = Some(port);
            }
        }
        if let Ok(val) = std::env::var("ALLOWED_ORIGINS") {
            self.allowed_origins = Some(
                val.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Ok(val) = std::env::var("DATA_DIR") {
            self.data_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("JWT_SECRET") {
            self.jwt_secret = Some(val);
        }
        if let Ok(val) = std::env::var("MAX_ROOMS") {
            if let Ok(n) = val.parse() {
                self.max_rooms = Some(n);
            }
        }
        if let Ok(val) = std::env::var("MAX_ROOMS_PER_USER") {
            if let Ok(n) = val.parse() {
                self.max_rooms_per_user = Some(n);
            }
        }
        if let Ok(val) = std::env::var("MAX_CLIENTS_PER_ROOM") {
            if let Ok(n) = val.parse() {
                self.max_clients_per_room = Some(n);
            }
        }
        if let Ok(val) = std::env::var("MAX_CONNECTIONS_PER_USER") {
            if let Ok(n) = val.parse() {
                self.max_connections_per_user = Some(n);
            }
        }
    }

    /// Merges this layer onto the core's compiled-in defaults, producing the
    /// value the core actually runs with.
    #[must_use]
    pub fn to_core_config(&self) -> CoreConfig {
        let mut core = CoreConfig::default();
        let host = self.bind_host.unwrap_or_else(|| core.bind_addr.ip());
        let port = self.bind_port.unwrap_or_else(|| core.bind_addr.port());
        core.bind_addr = SocketAddr::new(host, port);
        if let Some(origins) = &self.allowed_origins {
            core.allowed_origins = origins.clone();
        }
        if let Some(data_dir) = &self.data_dir {
            core.data_dir = data_dir.clone();
        }
        if let Some(n) = self.max_rooms {
            core.max_rooms = n;
        }
        if let Some(n) = self.max_rooms_per_user {
            core.max_rooms_per_user = n;
        }
        if let Some(n) = self.max_clients_per_room {
            core.max_clients_per_room = n;
        }
        if let Some(n) = self.max_connections_per_user {
            core.max_connections_per_user = n;
        }
        if let Some(n) = self.room_idle_timeout_secs {
            core.room_idle_timeout_secs = n;
        }
        if let Some(n) = self.sweeper_interval_secs {
            core.sweeper_interval_secs = n;
        }
        core
    }
}
