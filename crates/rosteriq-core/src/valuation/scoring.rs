// Fit (style similarity) and value (signed deviation) scores per candidate.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

/// Fit score returned for a candidate with missing or non-finite stats.
pub const FIT_SENTINEL: f64 = -1.0;

/// Candidate after scoring against a benchmark, before ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub player_id: i64,
    pub player_name: String,
    pub team_name: String,
    pub fit_score: f64,
    pub value_score: f64,
}

/// Cosine similarity between a standardized candidate and the benchmark.
///
/// Returns [`FIT_SENTINEL`] when the candidate has any non-finite entry and
/// 0.0 when either vector has zero norm.
pub fn fit_score(candidate: &[f64], benchmark: &[f64]) -> f64 {
    if candidate.iter().any(|v| !v.is_finite()) {
        return FIT_SENTINEL;
    }
    debug_assert_eq!(candidate.len(), benchmark.len());

    let dot: f64 = candidate.iter().zip(benchmark).map(|(a, b)| a * b).sum();
    let norm_c = candidate.iter().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = benchmark.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm_c == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_c * norm_b)).clamp(-1.0, 1.0)
}

// ---------------------------------------------------------------------------
// Value score
// ---------------------------------------------------------------------------

/// Weighted signed deviation from the benchmark for one position.
///
/// Inputs are standardized by the same scaler, so `candidate - benchmark` is
/// already `(raw_c - raw_b) / sigma`. Stats in the flip set are negated
/// (lower raw value is better). Stats without an entry in the weight table
/// get weight 1.
#[derive(Debug, Clone, Default)]
pub struct ValueScorer {
    weights: HashMap<String, f64>,
    flip: HashSet<String>,
}

impl ValueScorer {
    pub fn new(weights: HashMap<String, f64>, flip: HashSet<String>) -> Self {
        Self { weights, flip }
    }

    pub fn weight(&self, stat: &str) -> f64 {
        self.weights.get(stat).copied().unwrap_or(1.0)
    }

    pub fn is_flipped(&self, stat: &str) -> bool {
        self.flip.contains(stat)
    }

    /// `Σ(z·w) / Σw` over `columns`.
    ///
    /// Non-finite inputs propagate into a non-finite result; the caller skips
    /// such candidates. A zero total weight yields NaN for the same reason.
    pub fn value_score(&self, columns: &[String], candidate: &[f64], benchmark: &[f64]) -> f64 {
        debug_assert_eq!(columns.len(), candidate.len());
        debug_assert_eq!(columns.len(), benchmark.len());

        let mut weighted = 0.0;
        let mut total = 0.0;
        for ((stat, c), b) in columns.iter().zip(candidate).zip(benchmark) {
            let mut z = c - b;
            if self.is_flipped(stat) {
                z = -z;
            }
            let w = self.weight(stat);
            weighted += z * w;
            total += w;
        }
        if total == 0.0 {
            return f64::NAN;
        }
        weighted / total
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
