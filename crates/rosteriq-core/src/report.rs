// Valuation report: serializable request summary and leaderboard output.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::valuation::benchmark::WeightingScheme;
use crate::valuation::ranking::RankedCandidate;

/// Replace `player_id` on `team` going into `season`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplacementRequest {
    pub team: String,
    pub season: i32,
    pub player_id: i64,
}

/// Which stat family a benchmark covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkKind {
    /// Style columns, compared by cosine similarity.
    Fit,
    /// Production columns, compared by signed weighted deviation.
    Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterWeightEntry {
    pub cluster_id: i64,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkSummary {
    pub kind: BenchmarkKind,
    /// Benchmark values in raw stat units.
    pub values: BTreeMap<String, f64>,
    pub ess: f64,
    pub matched_rows: usize,
    pub scheme: WeightingScheme,
    pub low_confidence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCandidate {
    pub player_id: i64,
    pub player_name: String,
    pub reason: String,
}

/// Everything produced for one replacement request.
#[derive(Debug, Clone, Serialize)]
pub struct ValuationReport {
    pub request: ReplacementRequest,
    pub position: String,
    pub generated_at: DateTime<Utc>,
    pub team_clusters: Vec<ClusterWeightEntry>,
    pub player_clusters: Vec<ClusterWeightEntry>,
    pub benchmarks: Vec<BenchmarkSummary>,
    pub leaderboard: Vec<RankedCandidate>,
    pub skipped: Vec<SkippedCandidate>,
}

impl ValuationReport {
    /// The first `n` leaderboard entries.
    pub fn top(&self, n: usize) -> &[RankedCandidate] {
        &self.leaderboard[..n.min(self.leaderboard.len())]
    }

    pub fn benchmark(&self, kind: BenchmarkKind) -> Option<&BenchmarkSummary> {
        self.benchmarks.iter().find(|b| b.kind == kind)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize valuation report")
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write report to {}", path.display()))
    }
}

/// Write leaderboard rows as CSV with a header line.
pub fn write_leaderboard<W: Write>(writer: W, rows: &[RankedCandidate]) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    for row in rows {
        out.serialize(row).context("failed to write leaderboard row")?;
    }
    out.flush().context("failed to flush leaderboard")?;
    Ok(())
}

pub fn write_leaderboard_file(path: &Path, rows: &[RankedCandidate]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_leaderboard(file, rows)
}
