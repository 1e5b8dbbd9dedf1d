//! Core protocol types shared by every Tetriforge layer.
//!
//! Everything in this module crosses the boundary between the server core
//! and the Host (the transport that turns remote calls into method
//! invocations). That is why every type derives `Serialize`/`Deserialize`:
//! the Host decides the wire format, the core only hands it typed values.

use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a connected client (player or spectator).
///
/// Newtype wrapper around `u64` so a `ClientId` can never be passed where a
/// `RoomId` is expected. `#[serde(transparent)]` keeps the wire shape a
/// plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// A unique identifier for a connected administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminId(pub u64);

impl fmt::Display for AdminId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A-{}", self.0)
    }
}

/// A unique identifier for a game room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// Opaque identifier the Host assigns to each remote connection.
///
/// This is the "callback handle" key: registries refuse two sessions
/// bound to the same connection, and every inbound call is resolved to a
/// session through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Game values
// ---------------------------------------------------------------------------

/// The seven tetrominoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Piece {
    I,
    J,
    L,
    O,
    S,
    T,
    Z,
}

impl Piece {
    /// Every piece, in declaration order.
    pub const ALL: [Piece; 7] = [
        Piece::I,
        Piece::J,
        Piece::L,
        Piece::O,
        Piece::S,
        Piece::T,
        Piece::Z,
    ];
}

/// Special blocks a player can collect and use against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Special {
    AddLines,
    ClearLines,
    NukeField,
    RandomBlocksClear,
    SwitchFields,
    ClearSpecialBlocks,
    BlockGravity,
    BlockQuake,
    BlockBomb,
    ClearColumn,
    ZebraField,
    LeftGravity,
    Immunity,
    Darkness,
    Confusion,
}

impl Special {
    /// Every special, in declaration order.
    pub const ALL: [Special; 15] = [
        Special::AddLines,
        Special::ClearLines,
        Special::NukeField,
        Special::RandomBlocksClear,
        Special::SwitchFields,
        Special::ClearSpecialBlocks,
        Special::BlockGravity,
        Special::BlockQuake,
        Special::BlockBomb,
        Special::ClearColumn,
        Special::ZebraField,
        Special::LeftGravity,
        Special::Immunity,
        Special::Darkness,
        Special::Confusion,
    ];
}

/// Rule-set a room is created with. Selects the initial [`GameOptions`](crate::GameOptions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GameRules {
    /// No specials, classic line sending.
    Classic,
    /// The nine historic specials plus classic line sending.
    #[default]
    Standard,
    /// Every special, no classic line sending.
    Extended,
    /// Starts from Standard; meant to be edited by the game master.
    Custom,
}

/// Where and how a client placed a piece.
///
/// `index` is the piece just placed, `highest` the furthest index the
/// client has already seen in its preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub index: u32,
    pub highest: u32,
    pub piece: Piece,
    pub orientation: u8,
    pub x: i32,
    pub y: i32,
}

/// The client's own board, as submitted by the client.
///
/// The server never interprets the cells: placement geometry is computed
/// client-side, the server only stores and relays snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid(pub Vec<u8>);

impl Grid {
    /// An empty snapshot (no cells reported yet).
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Returns `true` if no cells were reported.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Client state and roles
// ---------------------------------------------------------------------------

/// Where a client is in its own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ClientState {
    /// Connected to the server, not in any room.
    #[default]
    Connected,
    /// Member of a room, no match running for this client.
    WaitInRoom,
    /// Taking part in the running match.
    Playing,
    /// Lost the running match; waits for it to finish.
    GameLost,
}

/// Role set of a room member.
///
/// A small bitset rather than three booleans: `PLAYER` and `SPECTATOR` are
/// mutually exclusive, `GAME_MASTER` is an overlay on one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roles(u8);

impl Roles {
    pub const NONE: Roles = Roles(0);
    pub const GAME_MASTER: Roles = Roles(0b001);
    pub const PLAYER: Roles = Roles(0b010);
    pub const SPECTATOR: Roles = Roles(0b100);

    /// Returns `true` if every bit of `other` is set.
    pub fn contains(self, other: Roles) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn insert(&mut self, other: Roles) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Roles) {
        self.0 &= !other.0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_player(self) -> bool {
        self.contains(Roles::PLAYER)
    }

    pub fn is_spectator(self) -> bool {
        self.contains(Roles::SPECTATOR)
    }

    pub fn is_game_master(self) -> bool {
        self.contains(Roles::GAME_MASTER)
    }
}

/// A vote-kick answer. Replaces a nullable boolean so every match is
/// exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VoteKickAnswer {
    #[default]
    NotVoted,
    Accepted,
    Rejected,
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The lifecycle state of a game room.
///
/// ```text
/// Created ──start──→ WaitStart ──start_game──→ Started ⇄ Paused
///    ↑                   ↑                        │
///    │                   └──(auto)── Finished ←───┘
///    └──(auto)── Stopping ←──stop── WaitStart | Started | Paused
/// ```
///
/// `Finished` and `Stopping` are transient: the room never rests in them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomState {
    Created,
    WaitStart,
    Started,
    Paused,
    Finished,
    Stopping,
}

impl RoomState {
    /// Returns `true` if clients may join.
    pub fn is_joinable(self) -> bool {
        !matches!(self, Self::Created | Self::Stopping)
    }

    /// Returns `true` while a match is running (paused counts).
    pub fn is_in_game(self) -> bool {
        matches!(self, Self::Started | Self::Paused)
    }

    /// Returns `true` if moving from `self` to `target` is a legal edge.
    pub fn can_transition_to(self, target: Self) -> bool {
        use RoomState::*;
        matches!(
            (self, target),
            (Created, WaitStart)
                | (WaitStart, Started)
                | (Started, Paused)
                | (Paused, Started)
                | (Started, Finished)
                | (Paused, Finished)
                | (Finished, WaitStart)
                | (WaitStart, Stopping)
                | (Started, Stopping)
                | (Paused, Stopping)
                | (Stopping, Created)
        )
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::WaitStart => "WaitStart",
            Self::Started => "Started",
            Self::Paused => "Paused",
            Self::Finished => "Finished",
            Self::Stopping => "Stopping",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Result codes and reasons
// ---------------------------------------------------------------------------

/// Reply to a connect request (client or admin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectResult {
    Successful,
    FailedServerStopped,
    FailedIncompatibleVersion,
    FailedBanned,
    FailedInvalidName,
    FailedNameAlreadyUsed,
    FailedTooManySessions,
    FailedDuplicateConnection,
    FailedWrongPassword,
}

impl ConnectResult {
    pub fn is_success(self) -> bool {
        self == Self::Successful
    }
}

/// Reply to a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameJoinResult {
    Successful,
    FailedNotFound,
    FailedWrongPassword,
    FailedTooManyPlayers,
    FailedTooManySpectators,
    FailedAlreadyInGame,
    FailedInvalidState,
}

impl GameJoinResult {
    pub fn is_success(self) -> bool {
        self == Self::Successful
    }
}

/// Reply to a room creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameCreateResult {
    Successful,
    FailedTooManyRooms,
    FailedNameAlreadyUsed,
    FailedInvalidName,
    FailedAlreadyInGame,
    /// The room was created but the creator could not join it, so it was
    /// removed again.
    FailedJoin(GameJoinResult),
}

/// Why a session left the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveReason {
    Disconnected,
    Timeout,
    ConnectionLost,
    Kick,
    Ban,
    ServerStopped,
}

impl fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameFinishedReason {
    /// A single player survived everyone else's loss.
    Won,
    /// The last players lost at the same time.
    NoWinner,
    /// Players left until at most one was still playing.
    NotEnoughPlayers,
    /// The game master (or the server) stopped the match.
    Stopped,
}

// ---------------------------------------------------------------------------
// Summaries and statistics
// ---------------------------------------------------------------------------

/// A room as seen in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub rule: GameRules,
    pub state: RoomState,
    pub player_count: usize,
    pub max_players: usize,
    pub spectator_count: usize,
    pub max_spectators: usize,
    pub has_password: bool,
}

/// A client as seen in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: ClientId,
    pub name: String,
    pub team: String,
    pub room: Option<RoomId>,
    pub state: ClientState,
    pub roles: Roles,
}

/// An admin as seen in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSummary {
    pub id: AdminId,
    pub name: String,
    pub address: IpAddr,
}

/// One line of a room's win-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinEntry {
    pub name: String,
    pub team: String,
    pub score: u32,
}

/// One banned address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    pub address: IpAddr,
    pub name: String,
    pub reason: String,
}

/// Per-player numbers collected during one match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerStatistics {
    pub client: Option<ClientId>,
    pub name: String,
    pub team: String,
    pub pieces_placed: u32,
    pub lines_cleared: u32,
    /// `(special, times used)`, sorted by special.
    pub specials_used: Vec<(Special, u32)>,
    pub playing_time: Duration,
    pub won: bool,
}

/// Everything reported when a match finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStatistics {
    pub room: RoomId,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub players: Vec<PlayerStatistics>,
}

// =========================================================================
// Tests
// =========================================================================
