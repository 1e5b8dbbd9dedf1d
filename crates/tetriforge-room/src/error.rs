//! Error types for the room layer.

use tetriforge_protocol::{ClientId, OptionsError, RoomId, RoomState};

/// Errors that can occur during room operations.
///
/// A refused operation changes nothing in the room.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The room is in a state that doesn't allow this operation.
    #[error("not allowed while the room is {0}")]
    InvalidState(RoomState),

    /// The client is not a member of this room.
    #[error("client {0} is not in this room")]
    NotMember(ClientId),

    /// Only the game master may do this.
    #[error("client {0} is not the game master")]
    NotGameMaster(ClientId),

    /// The client is not a player in this room.
    #[error("client {0} is not a player")]
    NotPlayer(ClientId),

    /// The client is not taking part in the running match.
    #[error("client {0} is not playing")]
    NotPlaying(ClientId),

    /// The target of a special or a vote-kick is not valid.
    #[error("client {0} is not a valid target")]
    InvalidTarget(ClientId),

    #[error("need at least {required} players, have {actual}")]
    NotEnoughPlayers { required: usize, actual: usize },

    #[error("a vote-kick is already in progress")]
    VoteInProgress,

    #[error("no vote-kick in progress")]
    NoVoteInProgress,

    #[error("client {0} already voted")]
    AlreadyVoted(ClientId),

    /// Rejected game options; the previous options stay in effect.
    #[error("invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),

    /// The room registry is full.
    #[error("too many rooms (capacity {0})")]
    TooManyRooms(usize),

    /// Another room already uses this name.
    #[error("room name {0:?} is already used")]
    NameAlreadyUsed(String),
}
