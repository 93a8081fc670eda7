// Team-context profile built from the incoming (returning) roster.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValuationError};
use crate::stats::{EntityType, StatVector};

/// Free-throw attempt share of a possession.
const FTA_POSSESSION_FACTOR: f64 = 0.44;

/// Box-score totals every roster line must carry.
pub const ROSTER_BOX_COLUMNS: [&str; 10] = [
    "FGA", "FGM", "FTA", "TOV", "STL", "OREB", "DREB", "P3M", "adjoe", "adjde",
];

/// Stat names of the generated team profile, in the order the team PCA model
/// is usually fitted on.
pub const TEAM_PROFILE_COLUMNS: [&str; 6] = [
    "team_adjoe",
    "team_adjde",
    "team_stltov_ratio",
    "team_oreb_per100",
    "team_dreb_per100",
    "team_eFG",
];

/// One returning player's prior-season totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterLine {
    pub player_id: i64,
    pub player_name: String,
    pub fga: f64,
    pub fgm: f64,
    pub fta: f64,
    pub tov: f64,
    pub stl: f64,
    pub oreb: f64,
    pub dreb: f64,
    pub p3m: f64,
    pub adjoe: f64,
    pub adjde: f64,
}

impl RosterLine {
    /// Read the box totals out of a stat vector. Missing stats are a `Schema`
    /// error.
    pub fn from_stats(stats: &StatVector) -> Result<Self> {
        let cols: Vec<String> = ROSTER_BOX_COLUMNS.iter().map(|s| s.to_string()).collect();
        let v = stats.select(&cols)?;
        Ok(Self {
            player_id: stats.owner_id,
            player_name: stats.owner_name.clone(),
            fga: v[0],
            fgm: v[1],
            fta: v[2],
            tov: v[3],
            stl: v[4],
            oreb: v[5],
            dreb: v[6],
            p3m: v[7],
            adjoe: v[8],
            adjde: v[9],
        })
    }

    /// `FGA + 0.44 * FTA + TOV - OREB`
    pub fn possessions(&self) -> f64 {
        self.fga + FTA_POSSESSION_FACTOR * self.fta + self.tov - self.oreb
    }
}

/// Aggregate a roster into the team-context stat vector.
///
/// Offensive and defensive efficiency are possession-weighted; rebounding is
/// expressed per 100 possessions. Zero possessions, zero field-goal attempts
/// or zero steals leave the profile undefined and fail with
/// `EmptyPopulation`.
pub fn aggregate_team_profile(team: &str, season: i32, roster: &[RosterLine]) -> Result<StatVector> {
    let poss: Vec<f64> = roster.iter().map(RosterLine::possessions).collect();
    let total_poss: f64 = poss.iter().sum();
    if roster.is_empty() || total_poss <= 0.0 {
        return Err(ValuationError::empty(format!(
            "roster for {team} ({season}) has no possessions"
        )));
    }

    let sum = |f: fn(&RosterLine) -> f64| roster.iter().map(f).sum::<f64>();
    let fga = sum(|r| r.fga);
    let stl = sum(|r| r.stl);
    if fga <= 0.0 {
        return Err(ValuationError::empty(format!(
            "roster for {team} ({season}) has no field-goal attempts"
        )));
    }
    if stl <= 0.0 {
        return Err(ValuationError::empty(format!(
            "roster for {team} ({season}) has no steals"
        )));
    }

    let weighted = |f: fn(&RosterLine) -> f64| {
        roster.iter().zip(&poss).map(|(r, p)| f(r) * p).sum::<f64>() / total_poss
    };

    Ok(StatVector::new(0, team, season, EntityType::Team, None)
        .with_stat("team_adjoe", weighted(|r| r.adjoe))
        .with_stat("team_adjde", weighted(|r| r.adjde))
        .with_stat("team_stltov_ratio", sum(|r| r.tov) / stl)
        .with_stat("team_oreb_per100", sum(|r| r.oreb) / total_poss * 100.0)
        .with_stat("team_dreb_per100", sum(|r| r.dreb) / total_poss * 100.0)
        .with_stat("team_eFG", (sum(|r| r.fgm) + 0.5 * sum(|r| r.p3m)) / fga))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn line(id: i64, fga: f64, fta: f64, tov: f64, oreb: f64, adjoe: f64) -> RosterLine {
        RosterLine {
            player_id: id,
            player_name: format!("p{id}"),
            fga,
            fgm: fga / 2.0,
            fta,
            tov,
            stl: 10.0,
            oreb,
            dreb: 40.0,
            p3m: 10.0,
            adjoe,
            adjde: 100.0,
        }
    }

    #[test]
    fn possessions_formula() {
        // 100 + 0.44 * 50 + 20 - 10 = 132
        assert!(approx_eq(line(1, 100.0, 50.0, 20.0, 10.0, 110.0).possessions(), 132.0, 1e-12));
    }

    #[test]
    fn profile_values() {
        // poss: 132 and 66 -> total 198
        let roster = vec![
            line(1, 100.0, 50.0, 20.0, 10.0, 120.0),
            line(2, 50.0, 25.0, 10.0, 5.0, 90.0),
        ];
        let p = aggregate_team_profile("Gonzaga", 2024, &roster).unwrap();
        // adjoe: (120 * 132 + 90 * 66) / 198 = 110
        assert!(approx_eq(p.get("team_adjoe").unwrap(), 110.0, 1e-9));
        assert!(approx_eq(p.get("team_adjde").unwrap(), 100.0, 1e-9));
        // tov 30 / stl 20
        assert!(approx_eq(p.get("team_stltov_ratio").unwrap(), 1.5, 1e-12));
        // oreb 15 / 198 * 100
        assert!(approx_eq(p.get("team_oreb_per100").unwrap(), 1500.0 / 198.0, 1e-9));
        assert!(approx_eq(p.get("team_dreb_per100").unwrap(), 8000.0 / 198.0, 1e-9));
        // (75 + 0.5 * 20) / 150
        assert!(approx_eq(p.get("team_eFG").unwrap(), 85.0 / 150.0, 1e-12));
        assert_eq!(p.len(), TEAM_PROFILE_COLUMNS.len());
        assert_eq!(p.entity_type, EntityType::Team);
    }

    #[test]
    fn empty_roster_is_empty_population() {
        let err = aggregate_team_profile("Nobody", 2024, &[]).unwrap_err();
        assert!(matches!(err, ValuationError::EmptyPopulation { .. }));
    }

    #[test]
    fn zero_steals_is_empty_population() {
        let mut l = line(1, 100.0, 10.0, 10.0, 5.0, 100.0);
        l.stl = 0.0;
        assert!(aggregate_team_profile("T", 2024, &[l]).is_err());
    }

    #[test]
    fn from_stats_requires_box_columns() {
        let stats = StatVector::new(3, "x", 2023, EntityType::Player, None).with_stat("FGA", 1.0);
        assert!(matches!(
            RosterLine::from_stats(&stats).unwrap_err(),
            ValuationError::Schema { .. }
        ));
    }
}
