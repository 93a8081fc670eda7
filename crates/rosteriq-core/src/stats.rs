// Stat vectors and population rows carried through the valuation pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValuationError};

// ---------------------------------------------------------------------------
// Entity category
// ---------------------------------------------------------------------------

/// Whether a vector (or a model artifact) describes a team or a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Team,
    Player,
}

impl EntityType {
    /// Directory / label-scope name used by the artifact store.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Team => "team",
            EntityType::Player => "player",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StatVector
// ---------------------------------------------------------------------------

/// Named stats for one owner (player or team) in one season.
///
/// Stats are keyed by name; column order is imposed by the caller through
/// [`StatVector::select`], so two vectors selected with the same column list
/// always line up element-wise. A stat may be present but NaN (a NULL in the
/// source), which is different from the stat being absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatVector {
    pub owner_id: i64,
    pub owner_name: String,
    pub season: i32,
    pub entity_type: EntityType,
    pub position: Option<String>,
    stats: BTreeMap<String, f64>,
}

impl StatVector {
    pub fn new(
        owner_id: i64,
        owner_name: impl Into<String>,
        season: i32,
        entity_type: EntityType,
        position: Option<String>,
    ) -> Self {
        Self {
            owner_id,
            owner_name: owner_name.into(),
            season,
            entity_type,
            position,
            stats: BTreeMap::new(),
        }
    }

    /// Builder-style insert, handy for fixtures.
    pub fn with_stat(mut self, name: impl Into<String>, value: f64) -> Self {
        self.stats.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.stats.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.stats.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stats.contains_key(name)
    }

    /// Stat names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Values for `columns`, in that order. Fails with `Schema` on the first
    /// absent column.
    pub fn select(&self, columns: &[String]) -> Result<Vec<f64>> {
        columns
            .iter()
            .map(|col| {
                self.get(col)
                    .ok_or_else(|| ValuationError::schema(col, self.describe()))
            })
            .collect()
    }

    /// The first column in `columns` that this vector lacks, if any.
    pub fn missing_column<'a>(&self, columns: &'a [String]) -> Option<&'a str> {
        columns
            .iter()
            .find(|c| !self.contains(c))
            .map(String::as_str)
    }

    /// True if any of `columns` is NaN or infinite (absent columns count as
    /// non-finite).
    pub fn has_non_finite(&self, columns: &[String]) -> bool {
        columns
            .iter()
            .any(|c| !self.get(c).is_some_and(f64::is_finite))
    }

    /// Short human-readable description for error messages and logs.
    pub fn describe(&self) -> String {
        format!(
            "{} '{}' ({}) season {}",
            self.entity_type, self.owner_name, self.owner_id, self.season
        )
    }
}

// ---------------------------------------------------------------------------
// Population rows
// ---------------------------------------------------------------------------

/// One historical player-season in a benchmark population, tagged with the
/// team and player archetype clusters assigned by the offline fitting process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRow {
    pub stats: StatVector,
    pub team_name: String,
    pub team_cluster: i64,
    pub player_cluster: i64,
}

/// Verify that every row carries every column, failing before any arithmetic.
pub fn require_columns(rows: &[PopulationRow], columns: &[String]) -> Result<()> {
    for row in rows {
        if let Some(col) = row.stats.missing_column(columns) {
            return Err(ValuationError::schema(col, row.stats.describe()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
