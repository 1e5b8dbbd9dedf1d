//! Server configuration.
//!
//! Every field has a default, so a config file only lists what it changes:
//!
//! ```json
//! {
//!   "max_clients": 32,
//!   "client_version": "1.13",
//!   "rooms": [{ "name": "lobby" }, { "name": "pros", "rule": "Extended" }]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tetriforge_protocol::GameRules;
use tetriforge_room::RoomConfig;
use tracing::warn;

use crate::ConfigError;

/// A room the server creates when it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetRoom {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub rule: GameRules,
}

/// Settings for one [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub max_clients: usize,
    pub max_admins: usize,
    pub max_rooms: usize,

    /// Applied to every room this server creates.
    pub room: RoomConfig,

    /// How often the watchdog scans sessions.
    pub watchdog_period: Duration,

    /// Inbound silence that counts as one timeout.
    pub timeout_delay: Duration,

    /// Consecutive timeouts before a session is dropped.
    pub max_timeout_count: u32,

    /// Outbound silence after which a heartbeat is pushed.
    pub heartbeat_delay: Duration,

    /// Version string clients and admins must announce.
    pub client_version: String,

    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub log_filter: String,

    pub rooms: Vec<PresetRoom>,
}

impl ServerConfig {
    const MIN_WATCHDOG_PERIOD: Duration = Duration::from_millis(10);
    const MAX_WATCHDOG_PERIOD: Duration = Duration::from_secs(1);

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Clamps out-of-range values, warning about each one.
    pub fn validated(mut self) -> Self {
        let period = self
            .watchdog_period
            .clamp(Self::MIN_WATCHDOG_PERIOD, Self::MAX_WATCHDOG_PERIOD);
        if period != self.watchdog_period {
            warn!(
                configured = ?self.watchdog_period,
                clamped = ?period,
                "watchdog_period out of range, clamping"
            );
            self.watchdog_period = period;
        }
        if self.timeout_delay < self.watchdog_period {
            warn!(
                timeout = ?self.timeout_delay,
                period = ?self.watchdog_period,
                "timeout_delay shorter than the watchdog period, raising"
            );
            self.timeout_delay = self.watchdog_period;
        }
        if self.heartbeat_delay < self.watchdog_period {
            warn!(
                heartbeat = ?self.heartbeat_delay,
                period = ?self.watchdog_period,
                "heartbeat_delay shorter than the watchdog period, raising"
            );
            self.heartbeat_delay = self.watchdog_period;
        }
        if self.max_timeout_count == 0 {
            warn!("max_timeout_count is 0, using 1");
            self.max_timeout_count = 1;
        }
        for (field, value) in [
            ("max_clients", &mut self.max_clients),
            ("max_rooms", &mut self.max_rooms),
            ("room.max_players", &mut self.room.max_players),
        ] {
            if *value == 0 {
                warn!(field, "capacity is 0, using 1");
                *value = 1;
            }
        }
        if self.room.initial_pieces == 0 {
            warn!("room.initial_pieces is 0, using 1");
            self.room.initial_pieces = 1;
        }
        if self.room.look_ahead_pieces == 0 {
            warn!("room.look_ahead_pieces is 0, using 1");
            self.room.look_ahead_pieces = 1;
        }
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 64,
            max_admins: 8,
            max_rooms: 32,
            room: RoomConfig::default(),
            watchdog_period: Duration::from_millis(100),
            timeout_delay: Duration::from_secs(5),
            max_timeout_count: 3,
            heartbeat_delay: Duration::from_millis(300),
            client_version: "1.13".to_owned(),
            log_filter: "info".to_owned(),
            rooms: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ServerConfig::default();
        assert_eq!(config.watchdog_period, Duration::from_millis(100));
        assert_eq!(config.timeout_delay, Duration::from_secs(5));
        assert_eq!(config.max_timeout_count, 3);
        assert_eq!(config.heartbeat_delay, Duration::from_millis(300));
        assert!(config.rooms.is_empty());
    }

    #[test]
    fn test_from_json_str_partial_keeps_defaults() {
        let config = ServerConfig::from_json_str(
            r#"{
                "max_clients": 2,
                "room": { "max_players": 4 },
                "rooms": [
                    { "name": "lobby" },
                    { "name": "pros", "password": "x", "rule": "Extended" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_clients, 2);
        assert_eq!(config.max_admins, 8);
        assert_eq!(config.room.max_players, 4);
        assert_eq!(config.room.max_spectators, 10);
        assert_eq!(config.rooms[0].rule, GameRules::Standard);
        assert_eq!(config.rooms[0].password, None);
        assert_eq!(config.rooms[1].rule, GameRules::Extended);
    }

    #[test]
    fn test_from_json_str_invalid_returns_error() {
        assert!(matches!(
            ServerConfig::from_json_str(r#"{"max_clients": "many"}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_from_json_file_missing_returns_io_error() {
        assert!(matches!(
            ServerConfig::from_json_file("/nonexistent/tetriforge.json"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_validated_clamps_out_of_range() {
        let config = ServerConfig {
            watchdog_period: Duration::ZERO,
            timeout_delay: Duration::ZERO,
            heartbeat_delay: Duration::ZERO,
            max_timeout_count: 0,
            max_clients: 0,
            ..ServerConfig::default()
        }
        .validated();
        assert_eq!(config.watchdog_period, Duration::from_millis(10));
        assert_eq!(config.timeout_delay, Duration::from_millis(10));
        assert_eq!(config.heartbeat_delay, Duration::from_millis(10));
        assert_eq!(config.max_timeout_count, 1);
        assert_eq!(config.max_clients, 1);
    }

    #[test]
    fn test_validated_keeps_valid_config() {
        let config = ServerConfig::default();
        assert_eq!(config.clone().validated(), config);
    }
}
