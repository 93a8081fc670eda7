// RosterIQ command-line driver.
//
// Startup sequence:
// 1. Parse arguments
// 2. Initialize tracing (log to file, not terminal)
// 3. Load config (copies defaults/ into config/ on first run)
// 4. Open database
// 5. Dispatch the subcommand

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use rosteriq_core::artifacts::FileArtifactStore;
use rosteriq_core::config::{self, Config};
use rosteriq_core::db::Database;
use rosteriq_core::engine::ValuationEngine;
use rosteriq_core::import;
use rosteriq_core::labels::JsonLabelService;
use rosteriq_core::report::{self, ReplacementRequest};

/// Rank transfer candidates as replacements for a departing player.
#[derive(Parser)]
#[command(name = "rosteriq")]
#[command(about = "Player archetype valuation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Value every transfer candidate as a replacement for one player
    Value {
        /// Team losing the player
        #[arg(long)]
        team: String,
        /// Season the replacement plays in
        #[arg(long)]
        season: i32,
        /// Id of the departing player
        #[arg(long = "player")]
        player_id: i64,
        /// Print the full report as JSON instead of the leaderboard CSV
        #[arg(long)]
        json: bool,
        /// Only print the first N leaderboard rows
        #[arg(long)]
        top: Option<usize>,
    },
    /// Value every request in a CSV (team,season,player_id)
    Batch {
        #[arg(long)]
        requests: PathBuf,
        /// Directory receiving one leaderboard CSV and JSON report per request
        #[arg(long)]
        out: PathBuf,
    },
    /// Load a wide season-stats CSV into the database
    ImportStats {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Load a cluster-assignment CSV into the database
    ImportClusters {
        #[arg(long)]
        csv: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // 1. Parse arguments
    let cli = Cli::parse();

    // 2. Initialize tracing (log to file, not terminal)
    init_tracing()?;
    info!("rosteriq starting up");

    // 3. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: positions={:?}, lookback={} seasons",
        config.positions.codes, config.population.lookback_years
    );

    // 4. Open database
    let db = Database::open(&config.data.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.data.db_path);

    // 5. Dispatch
    match cli.command {
        Commands::Value {
            team,
            season,
            player_id,
            json,
            top,
        } => {
            let engine = build_engine(config, db)?;
            let request = ReplacementRequest {
                team,
                season,
                player_id,
            };
            let report = engine.value(&request).context("valuation failed")?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                let rows = top.map_or(&report.leaderboard[..], |n| report.top(n));
                report::write_leaderboard(std::io::stdout().lock(), rows)?;
            }
        }
        Commands::Batch { requests, out } => {
            let engine = build_engine(config, db)?;
            run_batch(&engine, &requests, &out)?;
        }
        Commands::ImportStats { csv } => {
            let count = import::import_stats_csv(&db, &csv, &config.positions.codes)
                .with_context(|| format!("failed to import {}", csv.display()))?;
            println!("imported {count} player seasons");
        }
        Commands::ImportClusters { csv } => {
            let count = import::import_clusters_csv(&db, &csv)
                .with_context(|| format!("failed to import {}", csv.display()))?;
            println!("imported {count} cluster assignments");
        }
    }

    info!("rosteriq finished");
    Ok(())
}

fn build_engine(config: Config, db: Database) -> anyhow::Result<ValuationEngine> {
    let store = FileArtifactStore::new(&config.data.artifacts_dir);
    let labels_path = config.data.labels_path.clone();
    let mut engine = ValuationEngine::new(config, Arc::new(db), Box::new(store));

    // Labels are advisory; a missing or broken file only loses names in the report.
    if let Some(path) = labels_path {
        match JsonLabelService::load(Path::new(&path)) {
            Ok(labels) => {
                info!("Archetype labels loaded from {}", path);
                engine = engine.with_labels(Box::new(labels));
            }
            Err(e) => warn!("Archetype labels unavailable: {}", e),
        }
    }
    Ok(engine)
}

fn run_batch(engine: &ValuationEngine, requests_path: &Path, out: &Path) -> anyhow::Result<()> {
    let mut reader = csv::Reader::from_path(requests_path)
        .with_context(|| format!("failed to open {}", requests_path.display()))?;
    let requests = reader
        .deserialize::<ReplacementRequest>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse {}", requests_path.display()))?;
    info!("Loaded {} requests from {}", requests.len(), requests_path.display());

    std::fs::create_dir_all(out)
        .with_context(|| format!("failed to create output directory {}", out.display()))?;

    let outcome = engine.value_batch(&requests);
    for report in &outcome.reports {
        let stem = output_stem(&report.request);
        report::write_leaderboard_file(&out.join(format!("{stem}.csv")), &report.leaderboard)?;
        report.write_json(&out.join(format!("{stem}.json")))?;
    }
    for failure in &outcome.failures {
        eprintln!(
            "{} {} player {}: {}",
            failure.request.team, failure.request.season, failure.request.player_id, failure.error
        );
    }
    println!(
        "valued {} of {} requests ({} failed)",
        outcome.reports.len(),
        requests.len(),
        outcome.failures.len()
    );
    Ok(())
}

/// `<season>_<team>_<player_id>` with the team name reduced to a safe file name.
fn output_stem(request: &ReplacementRequest) -> String {
    let team: String = request
        .team
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}_{}", request.season, team, request.player_id)
}

/// Initialize tracing to log to a file so stdout carries only results.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("rosteriq.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rosteriq=info,rosteriq_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_stem_sanitizes_team() {
        let req = ReplacementRequest {
            team: "St. Mary's".into(),
            season: 2024,
            player_id: 17,
        };
        assert_eq!(output_stem(&req), "2024_St__Mary_s_17");
    }

    #[test]
    fn cli_parses_value_command() {
        let cli = Cli::try_parse_from([
            "rosteriq", "value", "--team", "Xavier", "--season", "2024", "--player", "9", "--top", "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Value {
                team,
                season,
                player_id,
                json,
                top,
            } => {
                assert_eq!(team, "Xavier");
                assert_eq!(season, 2024);
                assert_eq!(player_id, 9);
                assert!(!json);
                assert_eq!(top, Some(5));
            }
            _ => panic!("expected value command"),
        }
    }
}
