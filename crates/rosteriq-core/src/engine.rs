// Valuation engine: orchestrates matching, benchmarking and scoring for a
// roster-replacement request.
//
// Request flow:
//   1. Team context: incoming roster -> team profile -> team clusters
//   2. Player context: replaced player's profile -> player clusters (adaptive k)
//   3. Fit and value benchmarks over the weighted cluster population
//   4. Candidate scoring (parallel), then composite ranking
//   5. Report assembly

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::artifacts::{ArtifactCache, ModelArtifactStore};
use crate::config::Config;
use crate::error::{Result, ValuationError};
use crate::labels::LabelService;
use crate::population::{CandidateRecord, PopulationFilter, PopulationRepository};
use crate::report::{
    BenchmarkKind, BenchmarkSummary, ClusterWeightEntry, ReplacementRequest, SkippedCandidate,
    ValuationReport,
};
use crate::stats::EntityType;
use crate::valuation::benchmark::{aggregate, Benchmark};
use crate::valuation::cluster::rank_clusters;
use crate::valuation::roster::aggregate_team_profile;
use crate::valuation::scoring::{fit_score, ScoredCandidate, ValueScorer};
use crate::valuation::standardize::ScalerParams;
use crate::valuation::weights::{assign_weights, WeightedClusterAssignment};

/// A standardized benchmark together with the scaler that produced it.
#[derive(Debug, Clone)]
pub struct StandardizedBenchmark {
    pub benchmark: Benchmark,
    pub scaler: ScalerParams,
}

/// `(player_id, team, season, kind)`; team clusters depend on the team's
/// incoming roster.
type BenchmarkKey = (i64, String, i32, BenchmarkKind);

type Scored = std::result::Result<ScoredCandidate, SkippedCandidate>;

/// Replaced player's position and weighted player-archetype clusters.
#[derive(Debug, Clone)]
pub struct PlayerContext {
    pub position: String,
    pub weights: WeightedClusterAssignment,
}

/// A request that failed inside a batch run.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub request: ReplacementRequest,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub reports: Vec<ValuationReport>,
    pub failures: Vec<BatchFailure>,
}

pub struct ValuationEngine {
    config: Config,
    repo: Arc<dyn PopulationRepository>,
    artifacts: ArtifactCache,
    labels: Option<Box<dyn LabelService>>,
    benchmarks: Mutex<HashMap<BenchmarkKey, Arc<StandardizedBenchmark>>>,
}

impl ValuationEngine {
    pub fn new(
        config: Config,
        repo: Arc<dyn PopulationRepository>,
        store: Box<dyn ModelArtifactStore>,
    ) -> Self {
        Self {
            config,
            repo,
            artifacts: ArtifactCache::new(store),
            labels: None,
            benchmarks: Mutex::new(HashMap::new()),
        }
    }

    /// Attach an archetype label service used for reporting.
    pub fn with_labels(mut self, labels: Box<dyn LabelService>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn population_filter(&self) -> PopulationFilter {
        PopulationFilter::new(
            self.config.population.lookback_years,
            self.config.population.min_bpm,
        )
    }

    // ------------------------------------------------------------------
    // Matching
    // ------------------------------------------------------------------

    /// Weighted team-archetype clusters for the incoming roster without the
    /// replaced player.
    pub fn team_context(&self, request: &ReplacementRequest) -> Result<WeightedClusterAssignment> {
        let roster = self
            .repo
            .incoming_roster(&request.team, request.season, request.player_id)?;
        let profile = aggregate_team_profile(&request.team, request.season, &roster)?;

        let pca = self.artifacts.pca(request.season, EntityType::Team, None)?;
        let point = pca.project(&profile)?;
        let profiles = self.artifacts.profiles(request.season, EntityType::Team, None)?;
        let ranked = rank_clusters(&point, &profiles)?;

        let weights = assign_weights(
            &ranked,
            self.config.matching.team_k,
            self.config.matching.team_kernel,
        )?;
        info!(team = %request.team, roster = roster.len(), ?weights, "matched team clusters");
        Ok(weights)
    }

    /// Weighted player-archetype clusters for the replaced player.
    ///
    /// k comes from the adaptive policy: the sample size of the nearest player
    /// cluster inside the dominant team cluster, floored per position.
    pub fn player_context(
        &self,
        request: &ReplacementRequest,
        team_weights: &WeightedClusterAssignment,
    ) -> Result<PlayerContext> {
        // Position first; the position decides which model's features to load.
        let position = self
            .repo
            .player_profile(request.season, request.player_id, &[])?
            .position;
        let pca = self
            .artifacts
            .pca(request.season, EntityType::Player, Some(&position))?;
        let profile = self
            .repo
            .player_profile(request.season, request.player_id, &pca.features)?;
        let point = pca.project(&profile.stats)?;

        let profiles = self
            .artifacts
            .profiles(request.season, EntityType::Player, Some(&position))?;
        let ranked = rank_clusters(&point, &profiles)?;
        let nearest = ranked
            .first()
            .ok_or_else(|| ValuationError::empty(format!("no player clusters for {position}")))?;
        let team_cluster = team_weights
            .dominant()
            .ok_or_else(|| ValuationError::degenerate("team cluster weights are empty"))?;

        let sample = self.repo.cluster_sample_size(
            request.season,
            &position,
            team_cluster,
            nearest.cluster_id,
            &self.population_filter(),
        )?;
        let k = self.config.adaptive_k().choose(
            sample,
            self.config.min_player_k(&position),
            self.config.matching.player_k,
        );

        let weights = assign_weights(&ranked, k, self.config.matching.player_kernel)?;
        info!(
            player_id = request.player_id,
            %position,
            nearest = nearest.cluster_id,
            sample,
            k,
            ?weights,
            "matched player clusters"
        );
        Ok(PlayerContext { position, weights })
    }

    // ------------------------------------------------------------------
    // Benchmarks
    // ------------------------------------------------------------------

    fn columns(&self, kind: BenchmarkKind) -> &[String] {
        match kind {
            BenchmarkKind::Fit => &self.config.benchmark.fit_columns,
            BenchmarkKind::Value => &self.config.benchmark.value_columns,
        }
    }

    /// Standardized benchmark for the replaced player, cached per
    /// `(player_id, team, season, kind)`.
    pub fn benchmark(
        &self,
        request: &ReplacementRequest,
        kind: BenchmarkKind,
        position: &str,
        team_weights: &WeightedClusterAssignment,
        player_weights: &WeightedClusterAssignment,
    ) -> Result<Arc<StandardizedBenchmark>> {
        let key = (request.player_id, request.team.clone(), request.season, kind);
        if let Some(hit) = self
            .benchmarks
            .lock()
            .expect("benchmark cache mutex poisoned")
            .get(&key)
        {
            return Ok(Arc::clone(hit));
        }

        let columns = self.columns(kind);
        let filter = self
            .population_filter()
            .with_clusters(team_weights.cluster_ids(), player_weights.cluster_ids());
        let rows = self
            .repo
            .population(request.season, position, columns, &filter)?;
        if rows.is_empty() {
            return Err(ValuationError::empty(format!(
                "no {position} population rows in the weighted clusters for {} ({})",
                request.team, request.season
            )));
        }

        let scaler = ScalerParams::fit_rows(&rows, columns)?;
        let standardized = scaler.standardize_rows(&rows)?;
        let benchmark = aggregate(&standardized, team_weights, player_weights, columns)?;

        if benchmark.ess < self.config.benchmark.min_ess {
            warn!(
                ?kind,
                ess = benchmark.ess,
                min_ess = self.config.benchmark.min_ess,
                "low-confidence benchmark"
            );
        }
        info!(?kind, ess = benchmark.ess, rows = benchmark.matched_rows, "built benchmark");

        let entry = Arc::new(StandardizedBenchmark { benchmark, scaler });
        self.benchmarks
            .lock()
            .expect("benchmark cache mutex poisoned")
            .insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    // ------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------

    /// Score candidates in parallel. Candidates that cannot be scored are
    /// returned separately with a reason; input order is preserved.
    pub fn score_candidates(
        &self,
        candidates: &[CandidateRecord],
        position: &str,
        fit: &StandardizedBenchmark,
        value: &StandardizedBenchmark,
    ) -> (Vec<ScoredCandidate>, Vec<SkippedCandidate>) {
        let scorer = ValueScorer::new(self.config.stat_weights_for(position), self.config.flip_set());
        let value_columns = self.columns(BenchmarkKind::Value);

        let results: Vec<Scored> = candidates
            .par_iter()
            .map(|c| -> Scored {
                let skip = |reason: String| SkippedCandidate {
                    player_id: c.stats.owner_id,
                    player_name: c.stats.owner_name.clone(),
                    reason,
                };
                let fit_vec = fit.scaler.transform(&c.stats).map_err(|e| skip(e.to_string()))?;
                let value_vec = value.scaler.transform(&c.stats).map_err(|e| skip(e.to_string()))?;

                let fit_score = fit_score(&fit_vec, &fit.benchmark.values);
                let value_score = scorer.value_score(value_columns, &value_vec, &value.benchmark.values);
                if !value_score.is_finite() {
                    return Err(skip("value score is not finite (missing value stats)".into()));
                }
                Ok(ScoredCandidate {
                    player_id: c.stats.owner_id,
                    player_name: c.stats.owner_name.clone(),
                    team_name: c.new_team.clone(),
                    fit_score,
                    value_score,
                })
            })
            .collect();

        let mut scored = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for result in results {
            match result {
                Ok(s) => scored.push(s),
                Err(s) => {
                    warn!(player_id = s.player_id, reason = %s.reason, "skipping candidate");
                    skipped.push(s);
                }
            }
        }
        (scored, skipped)
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Value every transfer candidate as a replacement for the requested
    /// player.
    pub fn value(&self, request: &ReplacementRequest) -> Result<ValuationReport> {
        info!(team = %request.team, season = request.season, player_id = request.player_id, "valuation request");

        let team_weights = self.team_context(request)?;
        let player = self.player_context(request, &team_weights)?;

        let fit = self.benchmark(
            request,
            BenchmarkKind::Fit,
            &player.position,
            &team_weights,
            &player.weights,
        )?;
        let value = self.benchmark(
            request,
            BenchmarkKind::Value,
            &player.position,
            &team_weights,
            &player.weights,
        )?;

        // Schema problems in the pool are fatal for the request.
        let columns = union_columns(self.columns(BenchmarkKind::Fit), self.columns(BenchmarkKind::Value));
        let candidates: Vec<CandidateRecord> = self
            .repo
            .candidates(
                request.season,
                &player.position,
                &columns,
                self.config.population.candidate_min_minutes,
            )?
            .into_iter()
            .filter(|c| c.stats.owner_id != request.player_id)
            .collect();

        let (scored, skipped) = self.score_candidates(&candidates, &player.position, &fit, &value);
        let leaderboard = self.config.ranker().rank(scored);
        info!(
            candidates = candidates.len(),
            ranked = leaderboard.len(),
            skipped = skipped.len(),
            "ranked candidates"
        );

        Ok(ValuationReport {
            request: request.clone(),
            position: player.position.clone(),
            generated_at: Utc::now(),
            team_clusters: self.cluster_entries(request.season, "team", &team_weights),
            player_clusters: self.cluster_entries(request.season, &player.position, &player.weights),
            benchmarks: vec![
                self.summarize(BenchmarkKind::Fit, &fit)?,
                self.summarize(BenchmarkKind::Value, &value)?,
            ],
            leaderboard,
            skipped,
        })
    }

    /// Run requests in turn. A failing request is logged and recorded; the
    /// rest of the batch still runs.
    pub fn value_batch(&self, requests: &[ReplacementRequest]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for request in requests {
            match self.value(request) {
                Ok(report) => outcome.reports.push(report),
                Err(e) => {
                    warn!(
                        team = %request.team,
                        season = request.season,
                        player_id = request.player_id,
                        "valuation failed: {e}"
                    );
                    outcome.failures.push(BatchFailure {
                        request: request.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            succeeded = outcome.reports.len(),
            failed = outcome.failures.len(),
            "batch complete"
        );
        outcome
    }

    // ------------------------------------------------------------------
    // Report helpers
    // ------------------------------------------------------------------

    fn cluster_entries(
        &self,
        season: i32,
        scope: &str,
        weights: &WeightedClusterAssignment,
    ) -> Vec<ClusterWeightEntry> {
        weights
            .iter()
            .map(|(cluster_id, weight)| {
                let label = self
                    .labels
                    .as_ref()
                    .and_then(|svc| svc.label(season, scope, cluster_id));
                ClusterWeightEntry {
                    cluster_id,
                    weight,
                    label: label.as_ref().map(|l| l.label.clone()),
                    rationale: label
                        .map(|l| l.rationale)
                        .filter(|r| !r.is_empty()),
                }
            })
            .collect()
    }

    fn summarize(&self, kind: BenchmarkKind, entry: &StandardizedBenchmark) -> Result<BenchmarkSummary> {
        let raw = entry.scaler.inverse_transform(&entry.benchmark.values)?;
        Ok(BenchmarkSummary {
            kind,
            values: entry.benchmark.columns.iter().cloned().zip(raw).collect(),
            ess: entry.benchmark.ess,
            matched_rows: entry.benchmark.matched_rows,
            scheme: entry.benchmark.scheme,
            low_confidence: entry.benchmark.ess < self.config.benchmark.min_ess,
        })
    }
}

/// `a` followed by the columns of `b` not already in `a`.
fn union_columns(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for col in b {
        if !out.contains(col) {
            out.push(col.clone());
        }
    }
    out
}
