//! Error types for the session layer.

use tetriforge_protocol::ConnectionId;

/// Errors that can occur while admitting or looking up sessions.
///
/// Registries never panic on a refused add: every refusal is one of these
/// variants, which the server maps onto a `ConnectResult`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The registry already holds `capacity` sessions.
    #[error("too many sessions (capacity {0})")]
    TooManySessions(usize),

    /// Another session is already bound to this connection.
    #[error("connection {0} already has a session")]
    DuplicateConnection(ConnectionId),

    /// The display name is used by another session.
    #[error("name {0:?} is already used")]
    NameTaken(String),

    /// Rejected by the [`AdminAuthenticator`](crate::AdminAuthenticator).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No session is bound to this connection.
    #[error("no session for connection {0}")]
    NotFound(ConnectionId),
}
