//! Room configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SeedSource;

/// Per-room settings that are not game options.
///
/// Game options (`GameOptions`) belong to the game master; these belong to
/// whoever runs the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Maximum players in the room.
    pub max_players: usize,

    /// Maximum spectators in the room.
    pub max_spectators: usize,

    /// How long a vote-kick waits for answers before it is dropped.
    pub vote_kick_timeout: Duration,

    /// How long the action queue consumer idles before re-checking
    /// cancellation.
    pub queue_poll: Duration,

    /// Pieces sent with `GameStarted`.
    pub initial_pieces: u32,

    /// Pieces sent per look-ahead batch. Doubled when the client has
    /// consumed everything it was sent.
    pub look_ahead_pieces: u32,

    /// Seed of the piece sequence.
    pub seed: SeedSource,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: 6,
            max_spectators: 10,
            vote_kick_timeout: Duration::from_secs(10),
            queue_poll: Duration::from_millis(10),
            initial_pieces: 5,
            look_ahead_pieces: 4,
            seed: SeedSource::Random,
        }
    }
}
