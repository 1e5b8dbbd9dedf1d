//! Unified error type for the Tetriforge server.

use std::path::PathBuf;

use tetriforge_protocol::{AdminId, ClientId, HostError};
use tetriforge_room::RoomError;
use tetriforge_session::SessionError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` variants let `?` lift session, room, host and config
/// errors into this one type.
#[derive(Debug, thiserror::Error)]
pub enum TetriforgeError {
    /// Hosts were registered but none of them started.
    #[error("no host could be started")]
    NoHostStarted,

    #[error("server already started")]
    AlreadyStarted,

    #[error("server not started")]
    NotStarted,

    /// A message or command named a client that is not connected.
    #[error("client {0} is not connected")]
    UnknownClient(ClientId),

    #[error("admin {0} is not connected")]
    UnknownAdmin(AdminId),

    /// Teams are fixed for the duration of a match.
    #[error("client {0} cannot change team while playing")]
    TeamLocked(ClientId),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Loading a [`ServerConfig`](crate::ServerConfig) failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}
