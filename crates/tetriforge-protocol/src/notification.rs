//! Outbound notifications and the callback seam the Host implements.
//!
//! The core never writes bytes. It calls [`Callback::notify`] on the
//! handle a session registered at connect time; the Host behind that
//! handle decides how the notification reaches the remote peer.
//!
//! # Wire shape
//!
//! Both enums are internally tagged (`#[serde(tag = "type")]`), so a Host
//! that speaks JSON gets flat objects:
//!
//! ```json
//! {"type":"SpecialUsed","special_id":3,"from":1,"to":2,"special":"BlockBomb"}
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    AdminId, ClientId, GameFinishedReason, GameJoinResult, GameOptions, GameStatistics, Grid,
    HostError, LeaveReason, Piece, RoomId, RoomSummary, Special, WinEntry,
};

/// Everything the server can push to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientNotification {
    // -- Server-wide -------------------------------------------------------
    ServerStopped,
    Heartbeat,
    ClientConnected {
        client: ClientId,
        name: String,
        team: String,
    },
    ClientDisconnected {
        client: ClientId,
        name: String,
        reason: LeaveReason,
    },
    AdminConnected {
        admin: AdminId,
        name: String,
    },
    AdminDisconnected {
        admin: AdminId,
        name: String,
        reason: LeaveReason,
    },
    BroadcastMessage {
        from: String,
        message: String,
    },
    PrivateMessage {
        from: String,
        message: String,
    },
    TeamChanged {
        client: ClientId,
        team: String,
    },
    RoomCreated {
        room: RoomSummary,
    },
    RoomDeleted {
        room: RoomId,
        name: String,
    },
    AchievementEarned {
        client: ClientId,
        achievement: u32,
        title: String,
    },

    // -- Room membership ----------------------------------------------------
    GameJoined {
        result: GameJoinResult,
        room: RoomId,
        options: GameOptions,
        is_game_master: bool,
    },
    GameLeft,
    ClientGameJoined {
        client: ClientId,
        name: String,
        as_spectator: bool,
    },
    ClientGameLeft {
        client: ClientId,
        name: String,
    },
    GameMasterModified {
        client: ClientId,
    },
    GameOptionsChanged {
        options: GameOptions,
    },
    WinListModified {
        win_list: Vec<WinEntry>,
    },
    VoteKickAsked {
        initiator: ClientId,
        target: ClientId,
        reason: String,
    },

    // -- Match lifecycle ----------------------------------------------------
    GameStarted {
        pieces: Vec<Piece>,
    },
    GamePaused,
    GameResumed,
    GameFinished {
        reason: GameFinishedReason,
        statistics: GameStatistics,
    },

    // -- Gameplay -----------------------------------------------------------
    /// More pieces for the receiving client, starting at `first_index`.
    PiecePlaced {
        first_index: u32,
        pieces: Vec<Piece>,
    },
    GridModified {
        client: ClientId,
        grid: Grid,
    },
    SpecialUsed {
        special_id: u64,
        from: ClientId,
        to: ClientId,
        special: Special,
    },
    /// Garbage lines sent by another player in classic mode.
    PlayerLinesAdded {
        special_id: u64,
        from: ClientId,
        count: u32,
    },
    /// Garbage lines sent by the server (sudden death).
    ServerLinesAdded {
        count: u32,
    },
    PlayerLost {
        client: ClientId,
    },
    PlayerWon {
        client: ClientId,
    },
    ContinuousSpecialFinished {
        client: ClientId,
        special: Special,
    },
}

/// Everything the server can push to an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AdminNotification {
    ServerStopped,
    Heartbeat,
    ClientConnected {
        client: ClientId,
        name: String,
        team: String,
    },
    ClientDisconnected {
        client: ClientId,
        name: String,
        reason: LeaveReason,
    },
    AdminConnected {
        admin: AdminId,
        name: String,
    },
    AdminDisconnected {
        admin: AdminId,
        name: String,
        reason: LeaveReason,
    },
    BroadcastMessage {
        from: String,
        message: String,
    },
    PrivateAdminMessage {
        from: String,
        message: String,
    },
    RoomCreated {
        room: RoomSummary,
    },
    RoomDeleted {
        room: RoomId,
        name: String,
    },
}

/// Delivery handle for one remote peer.
///
/// Implementations must not block: `notify` is called while a room lock
/// may be held.
pub trait Callback<N>: Send + Sync {
    fn notify(&self, notification: N) -> Result<(), HostError>;
}

/// A dropped receiver means the peer is gone.
impl<N: Send> Callback<N> for mpsc::UnboundedSender<N> {
    fn notify(&self, notification: N) -> Result<(), HostError> {
        self.send(notification)
            .map_err(|_| HostError::ConnectionClosed)
    }
}

pub type ClientCallback = dyn Callback<ClientNotification>;
pub type AdminCallback = dyn Callback<AdminNotification>;
