//! Weighted-random piece supply.
//!
//! Every player of a match receives the same piece sequence. The supplier
//! generates it lazily: reading index `n` generates every missing piece up
//! to `n` in order, so the sequence does not depend on the order clients
//! ask for pieces in.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tetriforge_protocol::{OCCURRENCE_TOTAL, OccurrenceTable, Piece};
use tracing::trace;

/// Storage grows by this many pieces at a time.
pub const GROWTH_STEP: usize = 256;

/// Where the RNG seed comes from on every reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SeedSource {
    /// Same sequence after every reset.
    Fixed(u64),
    /// Fresh seed on every reset.
    #[default]
    Random,
}

impl SeedSource {
    fn rng(self) -> StdRng {
        match self {
            Self::Fixed(seed) => StdRng::seed_from_u64(seed),
            Self::Random => StdRng::seed_from_u64(rand::rng().random()),
        }
    }
}

/// Deterministic, lazily grown piece sequence.
#[derive(Debug)]
pub struct PieceSupplier {
    table: OccurrenceTable<Piece>,
    /// Installed on the next reset.
    pending: Option<OccurrenceTable<Piece>>,
    seed: SeedSource,
    rng: StdRng,
    pieces: Vec<Piece>,
}

impl PieceSupplier {
    pub fn new(table: OccurrenceTable<Piece>, seed: SeedSource) -> Self {
        Self {
            table,
            pending: None,
            seed,
            rng: seed.rng(),
            pieces: Vec::new(),
        }
    }

    /// The piece at `index`, generating any missing pieces before it.
    pub fn get(&mut self, index: u32) -> Piece {
        let index = index as usize;
        while self.pieces.len() <= index {
            if self.pieces.len() == self.pieces.capacity() {
                self.pieces.reserve_exact(GROWTH_STEP);
                trace!(capacity = self.pieces.capacity(), "piece storage grown");
            }
            let piece = self.draw();
            self.pieces.push(piece);
        }
        self.pieces[index]
    }

    /// `count` consecutive pieces starting at `first`.
    pub fn batch(&mut self, first: u32, count: u32) -> Vec<Piece> {
        (first..first.saturating_add(count))
            .map(|index| self.get(index))
            .collect()
    }

    /// Replaces the occurrence table. Takes effect on the next [`reset`](Self::reset).
    pub fn set_occurrences(&mut self, table: OccurrenceTable<Piece>) {
        self.pending = Some(table);
    }

    /// Discards the sequence and restarts at index 0 with a re-seeded RNG.
    pub fn reset(&mut self) {
        if let Some(table) = self.pending.take() {
            self.table = table;
        }
        self.rng = self.seed.rng();
        self.pieces = Vec::new();
    }

    /// Number of pieces generated so far.
    pub fn generated(&self) -> usize {
        self.pieces.len()
    }

    /// Allocated storage, always a multiple of [`GROWTH_STEP`].
    pub fn storage(&self) -> usize {
        self.pieces.capacity()
    }

    fn draw(&mut self) -> Piece {
        let roll = self.rng.random_range(1..=OCCURRENCE_TOTAL);
        // Only an unvalidated table can come up empty.
        self.table.pick(roll).unwrap_or(Piece::I)
    }
}
