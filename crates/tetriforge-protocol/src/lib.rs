//! Shared vocabulary for Tetriforge.
//!
//! This crate defines what every other layer talks about:
//!
//! - **Types** ([`ClientId`], [`RoomState`], [`Piece`], [`Special`], etc.):
//!   identities, enums, result codes and listing DTOs.
//! - **Options** ([`GameOptions`], [`OccurrenceTable`]): the tunable rules
//!   of a room and their validation.
//! - **Notifications** ([`ClientNotification`], [`AdminNotification`]) and
//!   the [`Callback`] seam a Host implements to deliver them.
//! - **Errors** ([`HostError`], [`OptionsError`]).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sessions, rooms or the runtime.
//! It only describes values crossing the Host boundary.
//!
//! ```text
//! Host (wire) → Server (inbound calls) → Room → Callback (notifications) → Host
//! ```

mod error;
mod notification;
mod options;
mod types;

pub use error::{HostError, OptionsError};
pub use notification::{
    AdminCallback, AdminNotification, Callback, ClientCallback, ClientNotification,
};
pub use options::{GameOptions, OCCURRENCE_TOTAL, Occurrence, OccurrenceTable};
pub use types::{
    AdminId, AdminSummary, BanEntry, ClientId, ClientState, ClientSummary, ConnectResult,
    ConnectionId, GameCreateResult, GameFinishedReason, GameJoinResult, GameRules,
    GameStatistics, Grid, LeaveReason, Piece, Placement, PlayerStatistics, Roles, RoomId, RoomState,
    RoomSummary, Special, VoteKickAnswer, WinEntry,
};
