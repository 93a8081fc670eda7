// End-to-end valuation against an in-memory database and a temporary
// artifact tree.
//
// League layout (model season 2024, guards):
//   - Xavier loses player 100; returners 101 and 102 form the incoming roster.
//   - Houston's lone returner 104 profiles as team cluster 2.
//   - Population rows 200-204 sit in team cluster 1; 205 is in team cluster 2.
//   - Transfer candidates 300-304 move between teams going into 2024; 303 is
//     missing `ts_percent` and cannot be valued, 304 is missing `threeRate`.

use std::path::Path;
use std::sync::Arc;

use rosteriq_core::artifacts::FileArtifactStore;
use rosteriq_core::config::{parse_config, Config};
use rosteriq_core::db::{ClusterAssignment, Database, SeasonRecord};
use rosteriq_core::engine::ValuationEngine;
use rosteriq_core::error::ValuationError;
use rosteriq_core::labels::JsonLabelService;
use rosteriq_core::report::{BenchmarkKind, ReplacementRequest};
use tempfile::TempDir;

const CONFIG: &str = r#"
[data]
db_path = ":memory:"
artifacts_dir = "artifacts"

[positions]
codes = ["G", "F", "C"]

[population]
lookback_years = 3
min_bpm = -2.0
candidate_min_minutes = 80.0

[matching]
team_k = 1
player_k = 2
adaptive_k = true
sample_size_threshold = 30

[matching.team_kernel]
method = "inverse_pow"
power = 2.0

[matching.player_kernel]
method = "inverse_pow"
power = 1.5

[benchmark]
fit_columns = ["usg_percent", "threeRate"]
value_columns = ["ts_percent", "tov_percent"]
min_ess = 30.0

[scoring]
flip_stats = ["tov_percent"]

[scoring.stat_weights.G]
ts_percent = 2.0

[composite]
fit_weight = 0.6
value_weight = 0.4
cap = 3.5
t_scale = true
"#;

const LABELS: &str = r#"{
    "2024": {
        "team": {"1": {"label": "Balanced Attack", "rationale": "efficient half-court offense"}},
        "G": {"0": {"label": "Shot Creator"}}
    }
}"#;

fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() < epsilon
}

fn config() -> Config {
    parse_config(CONFIG, Path::new("engine.toml")).expect("test config should parse")
}

fn season(
    id: i64,
    year: i32,
    team: &str,
    pos: &str,
    stats: &[(&str, Option<f64>)],
) -> SeasonRecord {
    SeasonRecord {
        player_id: id,
        player_name: format!("Player {id}"),
        season_year: year,
        team_name: team.to_string(),
        position: pos.to_string(),
        bpm: Some(1.0),
        minutes: Some(600.0),
        stats: stats.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
    }
}

fn guard(usg: f64, three: Option<f64>, ts: Option<f64>, tov: f64) -> Vec<(&'static str, Option<f64>)> {
    vec![
        ("usg_percent", Some(usg)),
        ("threeRate", three),
        ("ts_percent", ts),
        ("tov_percent", Some(tov)),
    ]
}

fn box_line(adjoe: f64, adjde: f64) -> Vec<(&'static str, Option<f64>)> {
    vec![
        ("FGA", Some(200.0)),
        ("FGM", Some(100.0)),
        ("FTA", Some(50.0)),
        ("TOV", Some(30.0)),
        ("STL", Some(20.0)),
        ("OREB", Some(20.0)),
        ("DREB", Some(60.0)),
        ("P3M", Some(30.0)),
        ("adjoe", Some(adjoe)),
        ("adjde", Some(adjde)),
    ]
}

fn label(id: i64, year: i32, team_cluster: i64, player_cluster: i64) -> ClusterAssignment {
    ClusterAssignment {
        model_season: 2024,
        player_id: id,
        season_year: year,
        team_cluster,
        player_cluster,
    }
}

fn seed_database() -> Database {
    let db = Database::open(":memory:").unwrap();
    db.import_seasons(&[
        // Replaced player.
        season(100, 2023, "Xavier", "G", &guard(25.0, Some(0.40), Some(0.57), 13.0)),
        season(100, 2024, "Xavier", "G", &[]),
        // Returners.
        season(101, 2023, "Xavier", "F", &box_line(110.0, 95.0)),
        season(101, 2024, "Xavier", "F", &[]),
        season(102, 2023, "Xavier", "F", &box_line(110.0, 95.0)),
        season(102, 2024, "Xavier", "F", &[]),
        season(104, 2023, "Houston", "F", &box_line(90.0, 110.0)),
        season(104, 2024, "Houston", "F", &[]),
        // Population.
        season(200, 2023, "Arizona", "G", &guard(24.0, Some(0.40), Some(0.58), 14.0)),
        season(201, 2022, "Baylor", "G", &guard(26.0, Some(0.44), Some(0.60), 12.0)),
        season(202, 2021, "Creighton", "G", &guard(22.0, Some(0.36), Some(0.56), 16.0)),
        season(203, 2023, "Duke", "G", &guard(15.0, Some(0.20), Some(0.50), 20.0)),
        season(204, 2022, "Gonzaga", "G", &guard(16.0, Some(0.22), Some(0.52), 18.0)),
        season(205, 2023, "Houston", "G", &guard(30.0, Some(0.10), Some(0.45), 25.0)),
        // Transfer candidates.
        season(300, 2023, "Iowa", "G", &guard(24.0, Some(0.40), Some(0.62), 11.0)),
        season(300, 2024, "Kansas", "G", &[]),
        season(301, 2023, "Marquette", "G", &guard(15.0, Some(0.20), Some(0.50), 20.0)),
        season(301, 2024, "Purdue", "G", &[]),
        season(302, 2023, "Texas", "G", &guard(25.0, Some(0.42), Some(0.57), 15.0)),
        season(302, 2024, "Utah", "G", &[]),
        season(303, 2023, "Villanova", "G", &guard(23.0, Some(0.38), None, 13.0)),
        season(303, 2024, "Wake Forest", "G", &[]),
        season(304, 2023, "Wisconsin", "G", &guard(20.0, None, Some(0.54), 17.0)),
        season(304, 2024, "Yale", "G", &[]),
    ])
    .unwrap();
    db.import_cluster_assignments(&[
        label(200, 2023, 1, 0),
        label(201, 2022, 1, 0),
        label(202, 2021, 1, 0),
        label(203, 2023, 1, 1),
        label(204, 2022, 1, 1),
        label(205, 2023, 2, 0),
    ])
    .unwrap();
    db
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn seed_artifacts() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "2024/team/pca_params.json",
        r#"{"center": [0, 0, 0, 0, 0, 0], "scale": [1, 1, 1, 1, 1, 1],
            "features": ["team_adjoe", "team_adjde", "team_stltov_ratio",
                         "team_oreb_per100", "team_dreb_per100", "team_eFG"]}"#,
    );
    write(
        root,
        "2024/team/cluster_profiles.csv",
        "ID,PC1,PC2,PC3,PC4,PC5,PC6\n\
         1,110.0,95.0,1.5,8.6,25.9,0.575\n\
         2,90.0,110.0,0.8,5.0,20.0,0.45\n",
    );
    write(
        root,
        "2024/player/pca_params_G.json",
        r#"{"center": [20.0, 0.3], "scale": [5.0, 0.1], "features": ["usg_percent", "threeRate"]}"#,
    );
    write(
        root,
        "2024/player/cluster_profiles_G.csv",
        "ID,PC1,PC2\n0,1.0,1.0\n1,-1.0,-1.0\n2,5.0,5.0\n",
    );
    dir
}

fn engine(artifacts: &TempDir) -> ValuationEngine {
    ValuationEngine::new(
        config(),
        Arc::new(seed_database()),
        Box::new(FileArtifactStore::new(artifacts.path())),
    )
}

fn request(team: &str, player_id: i64) -> ReplacementRequest {
    ReplacementRequest {
        team: team.to_string(),
        season: 2024,
        player_id,
    }
}

#[test]
fn team_context_matches_roster_profile() {
    let artifacts = seed_artifacts();
    let weights = engine(&artifacts).team_context(&request("Xavier", 100)).unwrap();
    assert_eq!(weights.cluster_ids(), vec![1]);
    assert!(approx_eq(weights.get(1), 1.0, 1e-12));
}

#[test]
fn player_context_widens_k_for_thin_cluster() {
    let artifacts = seed_artifacts();
    let engine = engine(&artifacts);
    let req = request("Xavier", 100);
    let team = engine.team_context(&req).unwrap();
    let player = engine.player_context(&req, &team).unwrap();

    assert_eq!(player.position, "G");
    // Three matched rows is below the threshold, so two clusters blend.
    assert_eq!(player.weights.len(), 2);
    assert_eq!(player.weights.dominant(), Some(0));
    assert!(approx_eq(player.weights.total(), 1.0, 1e-9));
}

#[test]
fn value_ranks_transfer_candidates() {
    let artifacts = seed_artifacts();
    let report = engine(&artifacts).value(&request("Xavier", 100)).unwrap();

    assert_eq!(report.position, "G");
    let order: Vec<i64> = report.leaderboard.iter().map(|r| r.player_id).collect();
    assert_eq!(order, vec![300, 302, 304, 301]);
    let ranks: Vec<usize> = report.leaderboard.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    assert!(report.leaderboard[0].composite_score > 50.0);
    assert!(report.leaderboard[3].composite_score < 50.0);
    assert_eq!(report.leaderboard[0].team_name, "Kansas");

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].player_id, 303);
}

#[test]
fn benchmark_is_reported_in_raw_units() {
    let artifacts = seed_artifacts();
    let report = engine(&artifacts).value(&request("Xavier", 100)).unwrap();

    // Nearly all weight sits on team cluster 1 / player cluster 0 (rows 200-202).
    let fit = report.benchmark(BenchmarkKind::Fit).unwrap();
    assert!(approx_eq(fit.values["usg_percent"], 24.0, 1e-3));
    assert!(approx_eq(fit.values["threeRate"], 0.40, 1e-4));
    assert!(fit.low_confidence);
    assert!(fit.ess <= fit.matched_rows as f64 + 1e-9);

    let value = report.benchmark(BenchmarkKind::Value).unwrap();
    assert!(approx_eq(value.values["ts_percent"], 0.58, 1e-4));
    assert!(approx_eq(value.values["tov_percent"], 14.0, 1e-3));
}

#[test]
fn team_cluster_2_rows_are_not_in_the_benchmark() {
    let artifacts = seed_artifacts();
    let report = engine(&artifacts).value(&request("Xavier", 100)).unwrap();
    // Row 205 would pull usage toward 30 if it leaked in.
    assert_eq!(report.benchmark(BenchmarkKind::Fit).unwrap().matched_rows, 5);
}

#[test]
fn labels_are_attached_when_configured() {
    let artifacts = seed_artifacts();
    let engine = engine(&artifacts).with_labels(Box::new(JsonLabelService::from_json(LABELS).unwrap()));
    let report = engine.value(&request("Xavier", 100)).unwrap();

    assert_eq!(report.team_clusters[0].label.as_deref(), Some("Balanced Attack"));
    assert_eq!(
        report.team_clusters[0].rationale.as_deref(),
        Some("efficient half-court offense")
    );
    let shot_creator = report
        .player_clusters
        .iter()
        .find(|c| c.cluster_id == 0)
        .unwrap();
    assert_eq!(shot_creator.label.as_deref(), Some("Shot Creator"));
    assert!(shot_creator.rationale.is_none());
    assert!(report.player_clusters.iter().any(|c| c.label.is_none()));
}

#[test]
fn benchmarks_are_cached_per_player_and_kind() {
    let artifacts = seed_artifacts();
    let engine = engine(&artifacts);
    let req = request("Xavier", 100);
    let team = engine.team_context(&req).unwrap();
    let player = engine.player_context(&req, &team).unwrap();

    let first = engine
        .benchmark(&req, BenchmarkKind::Fit, &player.position, &team, &player.weights)
        .unwrap();
    let second = engine
        .benchmark(&req, BenchmarkKind::Fit, &player.position, &team, &player.weights)
        .unwrap();
    let value = engine
        .benchmark(&req, BenchmarkKind::Value, &player.position, &team, &player.weights)
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &value));
}

#[test]
fn missing_fit_stat_ranks_with_sentinel() {
    let artifacts = seed_artifacts();
    let report = engine(&artifacts).value(&request("Xavier", 100)).unwrap();

    let row = report
        .leaderboard
        .iter()
        .find(|r| r.player_id == 304)
        .expect("candidate without threeRate should still be ranked");
    assert_eq!(row.fit_score, -1.0);
    assert!(row.value_score.is_finite());
    assert!(report.skipped.iter().all(|s| s.player_id != 304));
}

#[test]
fn benchmarks_are_separate_per_team() {
    let artifacts = seed_artifacts();
    let engine = engine(&artifacts);

    let fit_benchmark = |team: &str| {
        let req = request(team, 100);
        let team_weights = engine.team_context(&req).unwrap();
        let player = engine.player_context(&req, &team_weights).unwrap();
        let bench = engine
            .benchmark(&req, BenchmarkKind::Fit, &player.position, &team_weights, &player.weights)
            .unwrap();
        (team_weights, bench)
    };

    let (xavier_team, xavier) = fit_benchmark("Xavier");
    let (houston_team, houston) = fit_benchmark("Houston");
    assert_eq!(xavier_team.cluster_ids(), vec![1]);
    assert_eq!(houston_team.cluster_ids(), vec![2]);
    assert!(!Arc::ptr_eq(&xavier, &houston));

    assert_eq!(xavier.benchmark.matched_rows, 5);
    // Only row 205 sits in team cluster 2.
    assert_eq!(houston.benchmark.matched_rows, 1);
    let raw = houston.scaler.inverse_transform(&houston.benchmark.values).unwrap();
    assert!(approx_eq(raw[0], 30.0, 1e-9));
    assert!(approx_eq(raw[1], 0.10, 1e-9));

    // The Xavier entry is still served from the cache afterwards.
    let (_, again) = fit_benchmark("Xavier");
    assert!(Arc::ptr_eq(&xavier, &again));
}

#[test]
fn unknown_team_has_empty_roster() {
    let artifacts = seed_artifacts();
    let err = engine(&artifacts).value(&request("Nowhere", 100)).unwrap_err();
    assert!(matches!(err, ValuationError::EmptyPopulation { .. }), "got {err}");
}

#[test]
fn missing_artifacts_fail_the_request() {
    let empty = tempfile::tempdir().unwrap();
    let err = engine(&empty).value(&request("Xavier", 100)).unwrap_err();
    assert!(matches!(err, ValuationError::Artifact { .. }), "got {err}");
}

#[test]
fn batch_collects_failures_and_continues() {
    let artifacts = seed_artifacts();
    let outcome = engine(&artifacts).value_batch(&[
        request("Xavier", 999),
        request("Xavier", 100),
    ]);

    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0].request.player_id, 100);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].request.player_id, 999);
    assert!(outcome.failures[0].error.contains("empty population"));
}
