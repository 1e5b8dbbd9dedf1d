//! The transport seam.
//!
//! A Host owns the wire: it accepts remote peers, turns their requests into
//! calls on [`Server`](crate::Server) (`client_connect`, `client_place_piece`,
//! and so on) and hands the server a callback per peer for notifications.
//! The server only starts and stops it.

use tetriforge_protocol::HostError;

pub trait Host: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn start(&self) -> Result<(), HostError>;

    fn stop(&self);
}
