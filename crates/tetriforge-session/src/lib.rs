//! Session management for Tetriforge.
//!
//! This crate handles who is connected to the server:
//!
//! 1. **Sessions**: one [`ClientSession`] per player or spectator, one
//!    [`AdminSession`] per administrator, each carrying its callback handle
//!    and liveness clock ([`Liveness`]).
//! 2. **Registries**: [`SessionRegistry`] enforces capacity, unique
//!    connection ids and unique names.
//! 3. **Admission**: the [`AdminAuthenticator`] and [`BanList`] seams the
//!    server consults before admitting anyone.
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)  ← holds Arc<ClientSession> as room members
//!     ↕
//! Session Layer (this crate)  ← identity, per-client data, liveness
//!     ↕
//! Protocol Layer (below)  ← ids, notifications, Callback
//! ```

mod auth;
mod ban;
mod error;
mod registry;
mod session;

pub use auth::{AdminAuthenticator, DenyAll, PasswordAuthenticator};
pub use ban::{BanList, MemoryBanList};
pub use error::SessionError;
pub use registry::{AdminRegistry, ClientRegistry, SessionRegistry};
pub use session::{
    AdminSession, ClientData, ClientSession, Liveness, LivenessCheck, MAX_NAME_LEN, Session,
    is_valid_name,
};
