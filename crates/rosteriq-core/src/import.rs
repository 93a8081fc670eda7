// CSV import of season stats and cluster assignments into the database.
//
// Season stats arrive wide: one row per player-season with bio columns
// (player_id, player_name, season_year, team_name, position, bpm, minutes)
// followed by any number of numeric stat columns. Cluster assignments arrive
// as one row per labelled player-season.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::db::{ClusterAssignment, Database, SeasonRecord};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Raw CSV serde structs (private)
// ---------------------------------------------------------------------------

/// Wide season row. Every column not named here lands in `stats`.
#[derive(Debug, Deserialize)]
struct RawSeasonRow {
    player_id: i64,
    #[serde(alias = "name", alias = "player")]
    player_name: String,
    #[serde(alias = "season", alias = "year")]
    season_year: i32,
    #[serde(alias = "team")]
    team_name: String,
    #[serde(alias = "pos")]
    position: String,
    #[serde(flatten)]
    stats: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawClusterRow {
    model_season: i32,
    player_id: i64,
    #[serde(alias = "season", alias = "year")]
    season_year: i32,
    team_cluster: i64,
    player_cluster: i64,
}

/// Interpret a cell: numbers pass through, blanks and NA markers are NULL.
/// Anything else is not a stat.
fn cell_value(value: &serde_json::Value) -> Option<Option<f64>> {
    match value {
        serde_json::Value::Number(n) => Some(n.as_f64()),
        serde_json::Value::Null => Some(None),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("nan") {
                Some(None)
            } else {
                s.parse::<f64>().ok().map(|v| v.is_finite().then_some(v))
            }
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Reader-based loaders (private, enable testing without temp files)
// ---------------------------------------------------------------------------

fn load_seasons_from_reader<R: Read>(rdr: R, positions: &[String]) -> Result<Vec<SeasonRecord>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut records = Vec::new();
    for result in reader.deserialize::<RawSeasonRow>() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed season row: {}", e);
                continue;
            }
        };
        let position = raw.position.trim().to_string();
        if !positions.is_empty() && !positions.contains(&position) {
            warn!(
                "skipping '{}' ({}): position '{}' not in taxonomy",
                raw.player_name.trim(),
                raw.season_year,
                position
            );
            continue;
        }

        let mut stats = raw.stats;
        let bpm = stats.remove("bpm").as_ref().and_then(cell_value).flatten();
        let minutes = stats
            .remove("minutes")
            .or_else(|| stats.remove("MIN"))
            .as_ref()
            .and_then(cell_value)
            .flatten();

        let mut stat_cells: Vec<(String, Option<f64>)> = stats
            .iter()
            .filter_map(|(name, value)| cell_value(value).map(|v| (name.clone(), v)))
            .collect();
        stat_cells.sort_by(|a, b| a.0.cmp(&b.0));

        records.push(SeasonRecord {
            player_id: raw.player_id,
            player_name: raw.player_name.trim().to_string(),
            season_year: raw.season_year,
            team_name: raw.team_name.trim().to_string(),
            position,
            bpm,
            minutes,
            stats: stat_cells,
        });
    }
    Ok(records)
}

fn load_clusters_from_reader<R: Read>(rdr: R) -> Result<Vec<ClusterAssignment>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut rows = Vec::new();
    for result in reader.deserialize::<RawClusterRow>() {
        match result {
            Ok(raw) => rows.push(ClusterAssignment {
                model_season: raw.model_season,
                player_id: raw.player_id,
                season_year: raw.season_year,
                team_cluster: raw.team_cluster,
                player_cluster: raw.player_cluster,
            }),
            Err(e) => warn!("skipping malformed cluster row: {}", e),
        }
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Public path-based API
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<std::fs::File, ImportError> {
    std::fs::File::open(path).map_err(|e| ImportError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Parse a wide season-stats CSV. Rows whose position is outside
/// `positions` are skipped (an empty taxonomy accepts all).
pub fn load_season_records(path: &Path, positions: &[String]) -> Result<Vec<SeasonRecord>, ImportError> {
    load_seasons_from_reader(open(path)?, positions).map_err(|e| ImportError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

/// Parse a cluster-assignment CSV.
pub fn load_cluster_assignments(path: &Path) -> Result<Vec<ClusterAssignment>, ImportError> {
    load_clusters_from_reader(open(path)?).map_err(|e| ImportError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

/// Load a season-stats CSV into `db`. Returns the number of seasons stored.
pub fn import_stats_csv(db: &Database, path: &Path, positions: &[String]) -> Result<usize, ImportError> {
    let records = load_season_records(path, positions)?;
    if records.is_empty() {
        return Err(ImportError::Validation(format!(
            "{} contained no usable season rows",
            path.display()
        )));
    }
    let count = db.import_seasons(&records)?;
    info!(path = %path.display(), count, "imported season stats");
    Ok(count)
}

/// Load a cluster-assignment CSV into `db`. Returns the number of rows stored.
pub fn import_clusters_csv(db: &Database, path: &Path) -> Result<usize, ImportError> {
    let rows = load_cluster_assignments(path)?;
    if rows.is_empty() {
        return Err(ImportError::Validation(format!(
            "{} contained no usable cluster rows",
            path.display()
        )));
    }
    let count = db.import_cluster_assignments(&rows)?;
    info!(path = %path.display(), count, "imported cluster assignments");
    Ok(count)
}
