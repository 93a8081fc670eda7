// Composite ranking: robust z-scores, winsorizing, linear blend, T-scores.

use serde::Serialize;

use crate::valuation::scoring::ScoredCandidate;

/// Consistency constant making MAD comparable to a normal standard deviation.
const MAD_SCALE: f64 = 1.4826;

/// Replaces a zero MAD or std before dividing.
const SPREAD_EPSILON: f64 = 1e-9;

/// A ranked leaderboard entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    /// 1-based position in the leaderboard.
    pub rank: usize,
    pub player_id: i64,
    pub player_name: String,
    pub team_name: String,
    pub fit_score: f64,
    pub value_score: f64,
    pub fit_z: f64,
    pub value_z: f64,
    pub composite_raw: f64,
    /// T-score when enabled, otherwise equal to `composite_raw`.
    pub composite_score: f64,
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// `(x - median) / (1.4826 * MAD)` for every value.
pub fn robust_z(values: &[f64]) -> Vec<f64> {
    let med = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    let mut mad = median(&deviations);
    if mad == 0.0 {
        mad = SPREAD_EPSILON;
    }
    values.iter().map(|v| (v - med) / (MAD_SCALE * mad)).collect()
}

/// `50 + 10 * (x - mean) / std`, population std, zero std guarded.
pub fn t_scores(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let mut std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std == 0.0 {
        std = SPREAD_EPSILON;
    }
    values.iter().map(|v| 50.0 + 10.0 * (v - mean) / std).collect()
}

/// Blends fit and value into one leaderboard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeRanker {
    pub fit_weight: f64,
    pub value_weight: f64,
    /// Winsorizing bound for each robust z.
    pub cap: f64,
    pub t_scale: bool,
}

impl Default for CompositeRanker {
    fn default() -> Self {
        Self {
            fit_weight: 0.6,
            value_weight: 0.4,
            cap: 3.5,
            t_scale: true,
        }
    }
}

impl CompositeRanker {
    /// Rank `candidates` descending on the composite scale.
    ///
    /// The output is a permutation of the input; equal scores keep their
    /// input order.
    pub fn rank(&self, candidates: Vec<ScoredCandidate>) -> Vec<RankedCandidate> {
        let fits: Vec<f64> = candidates.iter().map(|c| c.fit_score).collect();
        let values: Vec<f64> = candidates.iter().map(|c| c.value_score).collect();

        let fit_z: Vec<f64> = robust_z(&fits)
            .into_iter()
            .map(|z| z.clamp(-self.cap, self.cap))
            .collect();
        let value_z: Vec<f64> = robust_z(&values)
            .into_iter()
            .map(|z| z.clamp(-self.cap, self.cap))
            .collect();

        let raw: Vec<f64> = fit_z
            .iter()
            .zip(&value_z)
            .map(|(f, v)| self.fit_weight * f + self.value_weight * v)
            .collect();
        let scored = if self.t_scale { t_scores(&raw) } else { raw.clone() };

        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| RankedCandidate {
                rank: 0,
                player_id: c.player_id,
                player_name: c.player_name,
                team_name: c.team_name,
                fit_score: c.fit_score,
                value_score: c.value_score,
                fit_z: fit_z[i],
                value_z: value_z[i],
                composite_raw: raw[i],
                composite_score: scored[i],
            })
            .collect();

        // sort_by is stable, so ties keep input order.
        ranked.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));
        for (i, entry) in ranked.iter_mut().enumerate() {
            entry.rank = i + 1;
        }
        ranked
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
