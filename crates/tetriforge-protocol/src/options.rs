//! Game options and weighted occurrence tables.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{GameRules, OptionsError, Piece, Special};

/// Total weight every valid occurrence table must reach.
pub const OCCURRENCE_TOTAL: u32 = 100;

/// One weighted entry of an [`OccurrenceTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence<T> {
    pub value: T,
    pub weight: u32,
}

/// A weighted distribution over an enum's members.
///
/// Valid when every member appears exactly once and the weights sum to
/// [`OCCURRENCE_TOTAL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OccurrenceTable<T>(pub Vec<Occurrence<T>>);

impl<T: Copy + Eq + Hash + Debug> OccurrenceTable<T> {
    pub fn new(entries: impl IntoIterator<Item = (T, u32)>) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(value, weight)| Occurrence { value, weight })
                .collect(),
        )
    }

    /// Total weight, widened so client-supplied weights cannot wrap.
    pub fn sum(&self) -> u64 {
        self.0.iter().map(|o| u64::from(o.weight)).sum()
    }

    pub fn entries(&self) -> &[Occurrence<T>] {
        &self.0
    }

    /// Checks membership and weight total against the full member list.
    pub fn validate(&self, table: &'static str, all: &[T]) -> Result<(), OptionsError> {
        let mut seen = HashSet::with_capacity(self.0.len());
        for occurrence in &self.0 {
            if !seen.insert(occurrence.value) {
                return Err(OptionsError::DuplicateEntry {
                    table,
                    value: format!("{:?}", occurrence.value),
                });
            }
        }
        if let Some(missing) = all.iter().find(|v| !seen.contains(v)) {
            return Err(OptionsError::MissingEntry {
                table,
                value: format!("{missing:?}"),
            });
        }
        let sum = self.sum();
        if sum != u64::from(OCCURRENCE_TOTAL) {
            return Err(OptionsError::WeightSum { table, sum });
        }
        Ok(())
    }

    /// Maps a roll in `1..=OCCURRENCE_TOTAL` to a value by walking the
    /// cumulative weights. Zero-weight entries are never picked.
    pub fn pick(&self, roll: u32) -> Option<T> {
        let mut cumulative: u32 = 0;
        for occurrence in &self.0 {
            cumulative = cumulative.saturating_add(occurrence.weight);
            if occurrence.weight > 0 && roll <= cumulative {
                return Some(occurrence.value);
            }
        }
        None
    }
}

/// Everything the game master can tune for a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOptions {
    pub pieces: OccurrenceTable<Piece>,
    pub specials: OccurrenceTable<Special>,
    /// When `false` the special table is ignored, including by validation.
    pub specials_enabled: bool,
    /// Classic line sending: clearing 2/3/4 lines sends 1/2/4 to the others.
    pub classic_multiplayer: bool,
    pub inventory_size: u32,
    pub lines_to_make_special: u32,
    pub specials_added_per_line: u32,
    /// Seconds before sudden death starts. `0` disables it.
    pub sudden_death_delay_secs: u32,
    /// Seconds between two sudden-death garbage lines.
    pub sudden_death_tick_secs: u32,
    pub starting_level: u32,
}

impl GameOptions {
    /// Default options for a rule-set.
    pub fn for_rules(rules: GameRules) -> Self {
        let base = Self {
            pieces: default_pieces(),
            specials: standard_specials(),
            specials_enabled: true,
            classic_multiplayer: true,
            inventory_size: 10,
            lines_to_make_special: 1,
            specials_added_per_line: 1,
            sudden_death_delay_secs: 0,
            sudden_death_tick_secs: 1,
            starting_level: 0,
        };
        match rules {
            GameRules::Classic => Self {
                specials_enabled: false,
                ..base
            },
            GameRules::Standard | GameRules::Custom => base,
            GameRules::Extended => Self {
                specials: extended_specials(),
                classic_multiplayer: false,
                ..base
            },
        }
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        self.pieces.validate("pieces", &Piece::ALL)?;
        if self.specials_enabled {
            self.specials.validate("specials", &Special::ALL)?;
        }
        check_range("inventory_size", self.inventory_size, 1, 15)?;
        check_range("lines_to_make_special", self.lines_to_make_special, 1, 4)?;
        check_range("specials_added_per_line", self.specials_added_per_line, 1, 4)?;
        check_range("sudden_death_delay_secs", self.sudden_death_delay_secs, 0, 900)?;
        check_range("sudden_death_tick_secs", self.sudden_death_tick_secs, 1, 30)?;
        check_range("starting_level", self.starting_level, 0, 100)?;
        Ok(())
    }

    /// `None` when sudden death is disabled.
    pub fn sudden_death_delay(&self) -> Option<Duration> {
        (self.sudden_death_delay_secs > 0)
            .then(|| Duration::from_secs(u64::from(self.sudden_death_delay_secs)))
    }

    pub fn sudden_death_tick(&self) -> Duration {
        Duration::from_secs(u64::from(self.sudden_death_tick_secs.max(1)))
    }
}

impl Default for GameOptions {
    fn default() -> Self {
        Self::for_rules(GameRules::Standard)
    }
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), OptionsError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(OptionsError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn default_pieces() -> OccurrenceTable<Piece> {
    OccurrenceTable::new([
        (Piece::I, 15),
        (Piece::J, 14),
        (Piece::L, 14),
        (Piece::O, 14),
        (Piece::S, 14),
        (Piece::T, 15),
        (Piece::Z, 14),
    ])
}

fn standard_specials() -> OccurrenceTable<Special> {
    OccurrenceTable::new([
        (Special::AddLines, 19),
        (Special::ClearLines, 16),
        (Special::NukeField, 3),
        (Special::RandomBlocksClear, 14),
        (Special::SwitchFields, 3),
        (Special::ClearSpecialBlocks, 14),
        (Special::BlockGravity, 6),
        (Special::BlockQuake, 11),
        (Special::BlockBomb, 14),
        (Special::ClearColumn, 0),
        (Special::ZebraField, 0),
        (Special::LeftGravity, 0),
        (Special::Immunity, 0),
        (Special::Darkness, 0),
        (Special::Confusion, 0),
    ])
}

fn extended_specials() -> OccurrenceTable<Special> {
    OccurrenceTable::new([
        (Special::AddLines, 12),
        (Special::ClearLines, 10),
        (Special::NukeField, 3),
        (Special::RandomBlocksClear, 9),
        (Special::SwitchFields, 3),
        (Special::ClearSpecialBlocks, 8),
        (Special::BlockGravity, 5),
        (Special::BlockQuake, 7),
        (Special::BlockBomb, 9),
        (Special::ClearColumn, 7),
        (Special::ZebraField, 5),
        (Special::LeftGravity, 5),
        (Special::Immunity, 4),
        (Special::Darkness, 6),
        (Special::Confusion, 7),
    ])
}
