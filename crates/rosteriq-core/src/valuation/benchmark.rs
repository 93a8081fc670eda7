// Weighted benchmark aggregation over team x player archetype clusters.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, ValuationError};
use crate::stats::{require_columns, PopulationRow};
use crate::valuation::weights::WeightedClusterAssignment;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which weight dimensions produced a benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingScheme {
    /// Team weight times player weight per cluster pair.
    Joint,
    /// Joint weights were degenerate; team-cluster weights alone.
    TeamOnly,
    /// Joint and team-only were degenerate; player-cluster weights alone.
    PlayerOnly,
}

/// Representative stat values for a matched population plus the Kish
/// effective sample size behind them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Benchmark {
    pub columns: Vec<String>,
    pub values: Vec<f64>,
    pub ess: f64,
    /// Rows that received a positive individual weight.
    pub matched_rows: usize,
    pub scheme: WeightingScheme,
}

impl Benchmark {
    /// Benchmark values keyed by column.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().copied())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Effective sample size
// ---------------------------------------------------------------------------

/// Kish effective sample size `(Σw)² / Σw²`.
///
/// Weights are first rescaled to sum to their count, which leaves the ratio
/// unchanged but keeps the intermediate sums comparable across populations.
/// Returns 0 when the weights are empty or sum to zero.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() || total <= 0.0 {
        return 0.0;
    }
    let n = weights.len() as f64;
    let scaled: Vec<f64> = weights.iter().map(|w| w * n / total).collect();
    let sum: f64 = scaled.iter().sum();
    let sum_sq: f64 = scaled.iter().map(|w| w * w).sum();
    sum * sum / sum_sq
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// One weighted group of rows: the rows selected by a cluster key and the
/// weight that group carries.
struct Group<'a> {
    weight: f64,
    rows: Vec<&'a PopulationRow>,
}

/// Weighted mean of column means across groups, with per-row weights for ESS.
///
/// Returns `Ok(None)` when rows matched but the total weight is zero (the
/// caller decides on a fallback).
fn accumulate(groups: &[Group<'_>], columns: &[String], context: &str) -> Result<Option<(Vec<f64>, Vec<f64>)>> {
    if groups.iter().all(|g| g.rows.is_empty()) {
        return Err(ValuationError::empty(format!(
            "no population rows matched any weighted cluster ({context})"
        )));
    }

    let mut numerator = vec![0.0; columns.len()];
    let mut denominator = vec![0.0; columns.len()];
    let mut row_weights = Vec::new();

    for group in groups.iter().filter(|g| !g.rows.is_empty()) {
        for (i, col) in columns.iter().enumerate() {
            let finite: Vec<f64> = group
                .rows
                .iter()
                .filter_map(|r| r.stats.get(col))
                .filter(|v| v.is_finite())
                .collect();
            if finite.is_empty() {
                continue;
            }
            let mean = finite.iter().sum::<f64>() / finite.len() as f64;
            numerator[i] += group.weight * mean;
            denominator[i] += group.weight;
        }
        if group.weight > 0.0 {
            row_weights.extend(std::iter::repeat(group.weight).take(group.rows.len()));
        }
    }

    if row_weights.is_empty() {
        return Ok(None);
    }

    let mut values = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        if denominator[i] <= 0.0 {
            return Err(ValuationError::empty(format!(
                "no finite `{col}` values in the matched population ({context})"
            )));
        }
        values.push(numerator[i] / denominator[i]);
    }
    Ok(Some((values, row_weights)))
}

fn joint_groups<'a>(
    population: &'a [PopulationRow],
    team: &WeightedClusterAssignment,
    player: &WeightedClusterAssignment,
) -> Vec<Group<'a>> {
    let mut groups = Vec::with_capacity(team.len() * player.len());
    for (tc, wt) in team.iter() {
        for (pc, wp) in player.iter() {
            let rows: Vec<&PopulationRow> = population
                .iter()
                .filter(|r| r.team_cluster == tc && r.player_cluster == pc)
                .collect();
            debug!(team_cluster = tc, player_cluster = pc, rows = rows.len(), weight = wt * wp, "cluster pair");
            groups.push(Group {
                weight: wt * wp,
                rows,
            });
        }
    }
    groups
}

fn single_groups<'a>(
    population: &'a [PopulationRow],
    weights: &WeightedClusterAssignment,
    key: fn(&PopulationRow) -> i64,
) -> Vec<Group<'a>> {
    weights
        .iter()
        .map(|(cluster, weight)| Group {
            weight,
            rows: population.iter().filter(|r| key(r) == cluster).collect(),
        })
        .collect()
}

/// Aggregate a benchmark over `population` (already standardized if the
/// caller wants a standardized benchmark).
///
/// For every `(team_cluster, player_cluster)` pair the combined weight
/// `w_team * w_player` multiplies the mean of the matching rows; empty pairs
/// are skipped and the weighted sum is divided by the total weight of the
/// non-empty pairs. When the joint weights are degenerate the team-only and
/// then player-only schemes are tried before giving up with
/// `DegenerateWeight`. No matched rows at all is `EmptyPopulation`.
pub fn aggregate(
    population: &[PopulationRow],
    team_weights: &WeightedClusterAssignment,
    player_weights: &WeightedClusterAssignment,
    columns: &[String],
) -> Result<Benchmark> {
    require_columns(population, columns)?;

    let team = team_weights.normalize();
    let player = player_weights.normalize();

    let attempts: Vec<(WeightingScheme, Vec<Group<'_>>)> = match (&team, &player) {
        (Ok(t), Ok(p)) => vec![
            (WeightingScheme::Joint, joint_groups(population, t, p)),
            (WeightingScheme::TeamOnly, single_groups(population, t, |r| r.team_cluster)),
            (WeightingScheme::PlayerOnly, single_groups(population, p, |r| r.player_cluster)),
        ],
        (Ok(t), Err(_)) => vec![(
            WeightingScheme::TeamOnly,
            single_groups(population, t, |r| r.team_cluster),
        )],
        (Err(_), Ok(p)) => vec![(
            WeightingScheme::PlayerOnly,
            single_groups(population, p, |r| r.player_cluster),
        )],
        (Err(_), Err(_)) => {
            return Err(ValuationError::degenerate(
                "both team and player cluster weights are degenerate",
            ))
        }
    };

    for (scheme, groups) in &attempts {
        let context = format!("{scheme:?} weighting");
        match accumulate(groups, columns, &context)? {
            Some((values, row_weights)) => {
                if *scheme != WeightingScheme::Joint {
                    warn!(?scheme, "combined cluster weights were degenerate; fell back");
                }
                let ess = effective_sample_size(&row_weights);
                return Ok(Benchmark {
                    columns: columns.to_vec(),
                    values,
                    ess,
                    matched_rows: row_weights.len(),
                    scheme: *scheme,
                });
            }
            None => debug!(?scheme, "weights degenerate for matched rows"),
        }
    }

    Err(ValuationError::degenerate(
        "matched cluster subsets carry zero total weight under every scheme",
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
