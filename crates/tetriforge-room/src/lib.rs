//! Game rooms for Tetriforge.
//!
//! Each room owns its members, its match state machine and a dedicated
//! action queue consumer that applies gameplay events one at a time.
//!
//! # Key types
//!
//! - [`GameRoom`]: membership, match lifecycle, vote-kick, sudden death
//! - [`ActionQueue`]: per-room FIFO serializer for gameplay actions
//! - [`PieceSupplier`]: deterministic weighted-random piece sequence
//! - [`RoomRegistry`]: capacity-checked collection of rooms
//! - [`RoomConfig`]: per-room capacities, timeouts and piece counts

mod config;
mod error;
mod pieces;
mod queue;
mod registry;
mod room;

pub use config::RoomConfig;
pub use error::RoomError;
pub use pieces::{GROWTH_STEP, PieceSupplier, SeedSource};
pub use queue::{Action, ActionQueue};
pub use registry::RoomRegistry;
pub use room::{GameRoom, VOTE_KICK_MIN_PLAYERS};
