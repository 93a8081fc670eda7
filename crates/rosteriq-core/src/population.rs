// Population source: the read-only data the valuation engine draws from.

use crate::error::Result;
use crate::stats::{PopulationRow, StatVector};
use crate::valuation::roster::RosterLine;

/// Restrictions applied when extracting a benchmark population.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationFilter {
    /// Seasons `[season - lookback_years, season)` are included.
    pub lookback_years: i32,
    /// Rows must have a box plus/minus strictly above this.
    pub min_bpm: f64,
    /// When set, only rows in these team clusters.
    pub team_clusters: Option<Vec<i64>>,
    /// When set, only rows in these player clusters.
    pub player_clusters: Option<Vec<i64>>,
}

impl PopulationFilter {
    pub fn new(lookback_years: i32, min_bpm: f64) -> Self {
        Self {
            lookback_years,
            min_bpm,
            team_clusters: None,
            player_clusters: None,
        }
    }

    pub fn with_clusters(mut self, team: Vec<i64>, player: Vec<i64>) -> Self {
        self.team_clusters = Some(team);
        self.player_clusters = Some(player);
        self
    }

    /// Whether a row with these labels passes the cluster restriction.
    pub fn admits(&self, team_cluster: i64, player_cluster: i64) -> bool {
        self.team_clusters
            .as_ref()
            .map_or(true, |ids| ids.contains(&team_cluster))
            && self
                .player_clusters
                .as_ref()
                .map_or(true, |ids| ids.contains(&player_cluster))
    }
}

/// The replaced player's prior-season production.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerProfile {
    pub stats: StatVector,
    pub team_name: String,
    pub position: String,
}

/// A transfer candidate: prior-season stats plus the team moved from and to.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub stats: StatVector,
    pub previous_team: String,
    pub new_team: String,
}

/// Read access to historical player seasons and their archetype labels.
///
/// Implementations report a requested stat that a row lacks as a `Schema`
/// error and backend failures as `Repository`.
pub trait PopulationRepository: Send + Sync {
    /// Player-seasons for `position` in the lookback window before `season`,
    /// labelled with the clusters of model season `season`.
    fn population(
        &self,
        season: i32,
        position: &str,
        columns: &[String],
        filter: &PopulationFilter,
    ) -> Result<Vec<PopulationRow>>;

    /// Players who changed teams going into `season`, with `season - 1` stats.
    fn candidates(
        &self,
        season: i32,
        position: &str,
        columns: &[String],
        min_minutes: f64,
    ) -> Result<Vec<CandidateRecord>>;

    /// The player's `season - 1` stats and position.
    fn player_profile(&self, season: i32, player_id: i64, columns: &[String]) -> Result<PlayerProfile>;

    /// Returning players on `team` in `season`, with `season - 1` box totals,
    /// excluding `exclude_player_id`.
    fn incoming_roster(&self, team: &str, season: i32, exclude_player_id: i64) -> Result<Vec<RosterLine>>;

    /// Number of population rows carrying both cluster labels.
    fn cluster_sample_size(
        &self,
        season: i32,
        position: &str,
        team_cluster: i64,
        player_cluster: i64,
        filter: &PopulationFilter,
    ) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_filter_admits_everything() {
        let f = PopulationFilter::new(3, -2.0);
        assert!(f.admits(0, 0));
        assert!(f.admits(17, -4));
    }

    #[test]
    fn cluster_restriction() {
        let f = PopulationFilter::new(3, -2.0).with_clusters(vec![1, 2], vec![5]);
        assert!(f.admits(1, 5));
        assert!(f.admits(2, 5));
        assert!(!f.admits(3, 5));
        assert!(!f.admits(1, 6));
    }
}
