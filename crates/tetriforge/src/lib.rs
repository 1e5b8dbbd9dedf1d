//! # Tetriforge
//!
//! Authoritative session server core for multiplayer falling-block puzzle
//! games.
//!
//! Tetriforge admits clients and administrators, groups clients into game
//! rooms, serializes gameplay per room and drops sessions that go silent.
//! It never touches the wire: a [`Host`] turns remote requests into calls
//! on [`Server`] and registers one callback per peer for notifications.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//! use tetriforge::prelude::*;
//!
//! # async fn run() -> Result<(), TetriforgeError> {
//! tetriforge::logging::init("info");
//! let server = Server::builder().build(tokio::runtime::Handle::current());
//! server.start()?;
//!
//! // A Host would do this for every accepted peer.
//! let (tx, _rx) = tokio::sync::mpsc::unbounded_channel::<ClientNotification>();
//! let result = server.client_connect(
//!     ConnectionId::new(1),
//!     Arc::new(tx),
//!     IpAddr::V4(Ipv4Addr::LOCALHOST),
//!     &server.config().client_version,
//!     "alice",
//!     "",
//! );
//! assert!(result.is_success());
//!
//! server.stop().await
//! # }
//! ```

mod config;
mod error;
mod host;
pub mod logging;
mod server;

pub use config::{PresetRoom, ServerConfig};
pub use error::{ConfigError, TetriforgeError};
pub use host::Host;
pub use server::{Server, ServerBuilder};

/// The types a Host needs.
pub mod prelude {
    pub use crate::{Host, Server, ServerBuilder, ServerConfig, TetriforgeError};
    pub use tetriforge_protocol::{
        AdminNotification, ClientNotification, ConnectResult, ConnectionId, GameRules,
        HostError,
    };
}
