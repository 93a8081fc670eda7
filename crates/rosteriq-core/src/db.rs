// SQLite population source: player seasons, long-format stats, cluster labels.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::ValuationError;
use crate::population::{CandidateRecord, PlayerProfile, PopulationFilter, PopulationRepository};
use crate::stats::{EntityType, PopulationRow, StatVector};
use crate::valuation::roster::{RosterLine, ROSTER_BOX_COLUMNS};

/// One player's season: bio row plus every stat (NULL allowed).
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonRecord {
    pub player_id: i64,
    pub player_name: String,
    pub season_year: i32,
    pub team_name: String,
    pub position: String,
    pub bpm: Option<f64>,
    pub minutes: Option<f64>,
    pub stats: Vec<(String, Option<f64>)>,
}

/// Cluster labels assigned to a historical player-season by the model fitted
/// for `model_season`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterAssignment {
    pub model_season: i32,
    pub player_id: i64,
    pub season_year: i32,
    pub team_cluster: i64,
    pub player_cluster: i64,
}

type StatMap = HashMap<String, Option<f64>>;

/// Bio/label columns of one population row before stats are attached.
struct RawPopulationRow {
    player_id: i64,
    player_name: String,
    season_year: i32,
    team_name: String,
    team_cluster: i64,
    player_cluster: i64,
}

/// SQLite-backed store of historical player seasons.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS players (
                player_id   INTEGER PRIMARY KEY,
                player_name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS player_seasons (
                player_id   INTEGER NOT NULL REFERENCES players(player_id),
                season_year INTEGER NOT NULL,
                team_name   TEXT NOT NULL,
                position    TEXT NOT NULL,
                bpm         REAL,
                minutes     REAL,
                PRIMARY KEY (player_id, season_year)
            );

            CREATE TABLE IF NOT EXISTS player_stats (
                player_id   INTEGER NOT NULL,
                season_year INTEGER NOT NULL,
                stat_name   TEXT NOT NULL,
                value       REAL,
                PRIMARY KEY (player_id, season_year, stat_name),
                FOREIGN KEY (player_id, season_year)
                    REFERENCES player_seasons(player_id, season_year)
            );

            CREATE TABLE IF NOT EXISTS cluster_assignments (
                model_season   INTEGER NOT NULL,
                player_id      INTEGER NOT NULL,
                season_year    INTEGER NOT NULL,
                team_cluster   INTEGER NOT NULL,
                player_cluster INTEGER NOT NULL,
                PRIMARY KEY (model_season, player_id, season_year)
            );

            CREATE INDEX IF NOT EXISTS idx_player_seasons_year_pos
                ON player_seasons(season_year, position);
            CREATE INDEX IF NOT EXISTS idx_player_seasons_team
                ON player_seasons(team_name, season_year);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Import season records in a single transaction. Re-importing a season
    /// replaces its bio row and any stats it names.
    pub fn import_seasons(&self, records: &[SeasonRecord]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin season import")?;

        for rec in records {
            tx.execute(
                "INSERT INTO players (player_id, player_name) VALUES (?1, ?2)
                 ON CONFLICT(player_id) DO UPDATE SET player_name = excluded.player_name",
                params![rec.player_id, rec.player_name],
            )
            .context("failed to upsert player")?;

            tx.execute(
                "INSERT INTO player_seasons
                    (player_id, season_year, team_name, position, bpm, minutes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(player_id, season_year) DO UPDATE SET
                    team_name = excluded.team_name,
                    position  = excluded.position,
                    bpm       = excluded.bpm,
                    minutes   = excluded.minutes",
                params![
                    rec.player_id,
                    rec.season_year,
                    rec.team_name,
                    rec.position,
                    rec.bpm,
                    rec.minutes,
                ],
            )
            .context("failed to upsert player season")?;

            for (stat_name, value) in &rec.stats {
                tx.execute(
                    "INSERT OR REPLACE INTO player_stats (player_id, season_year, stat_name, value)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![rec.player_id, rec.season_year, stat_name, value],
                )
                .context("failed to insert player stat")?;
            }
        }

        tx.commit().context("failed to commit season import")?;
        Ok(records.len())
    }

    /// Import cluster assignments in a single transaction.
    pub fn import_cluster_assignments(&self, rows: &[ClusterAssignment]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("failed to begin cluster import")?;

        for a in rows {
            tx.execute(
                "INSERT OR REPLACE INTO cluster_assignments
                    (model_season, player_id, season_year, team_cluster, player_cluster)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    a.model_season,
                    a.player_id,
                    a.season_year,
                    a.team_cluster,
                    a.player_cluster,
                ],
            )
            .context("failed to insert cluster assignment")?;
        }

        tx.commit().context("failed to commit cluster import")?;
        Ok(rows.len())
    }

    /// Number of stored player-seasons.
    pub fn season_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM player_seasons", [], |row| row.get(0))
            .context("failed to count player seasons")?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn load_stats(conn: &Connection, player_id: i64, season_year: i32) -> Result<StatMap> {
        let mut stmt = conn
            .prepare_cached(
                "SELECT stat_name, value FROM player_stats
                 WHERE player_id = ?1 AND season_year = ?2",
            )
            .context("failed to prepare stat query")?;
        let stats = stmt
            .query_map(params![player_id, season_year], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<f64>>(1)?))
            })
            .context("failed to query player stats")?
            .collect::<std::result::Result<StatMap, _>>()
            .context("failed to map player stat rows")?;
        Ok(stats)
    }

    fn fetch_population(
        &self,
        season: i32,
        position: &str,
        filter: &PopulationFilter,
    ) -> Result<Vec<(RawPopulationRow, StatMap)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT ps.player_id, p.player_name, ps.season_year, ps.team_name,
                        ca.team_cluster, ca.player_cluster
                 FROM player_seasons ps
                 JOIN players p ON p.player_id = ps.player_id
                 JOIN cluster_assignments ca
                   ON ca.player_id = ps.player_id
                  AND ca.season_year = ps.season_year
                  AND ca.model_season = ?1
                 WHERE ps.season_year >= ?1 - ?2
                   AND ps.season_year < ?1
                   AND ps.position = ?3
                   AND ps.bpm > ?4
                 ORDER BY ps.season_year, ps.player_id",
            )
            .context("failed to prepare population query")?;

        let raw = stmt
            .query_map(
                params![season, filter.lookback_years, position, filter.min_bpm],
                |row| {
                    Ok(RawPopulationRow {
                        player_id: row.get(0)?,
                        player_name: row.get(1)?,
                        season_year: row.get(2)?,
                        team_name: row.get(3)?,
                        team_cluster: row.get(4)?,
                        player_cluster: row.get(5)?,
                    })
                },
            )
            .context("failed to query population")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map population rows")?;

        let mut out = Vec::with_capacity(raw.len());
        for row in raw
            .into_iter()
            .filter(|r| filter.admits(r.team_cluster, r.player_cluster))
        {
            let stats = Self::load_stats(&conn, row.player_id, row.season_year)?;
            out.push((row, stats));
        }
        Ok(out)
    }

    fn fetch_candidates(
        &self,
        season: i32,
        position: &str,
        min_minutes: f64,
    ) -> Result<Vec<(i64, String, String, String, StatMap)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT cur.player_id, p.player_name, prev.team_name, cur.team_name
                 FROM player_seasons cur
                 JOIN player_seasons prev
                   ON prev.player_id = cur.player_id
                  AND prev.season_year = cur.season_year - 1
                 JOIN players p ON p.player_id = cur.player_id
                 WHERE cur.season_year = ?1
                   AND cur.team_name <> prev.team_name
                   AND prev.position = ?2
                   AND prev.minutes > ?3
                 ORDER BY cur.player_id",
            )
            .context("failed to prepare candidate query")?;

        let rows = stmt
            .query_map(params![season, position, min_minutes], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("failed to query candidates")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map candidate rows")?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, name, prev_team, new_team) in rows {
            let stats = Self::load_stats(&conn, id, season - 1)?;
            out.push((id, name, prev_team, new_team, stats));
        }
        Ok(out)
    }

    fn fetch_profile(&self, season: i32, player_id: i64) -> Result<Option<(String, String, String, StatMap)>> {
        let conn = self.conn();
        let bio = conn
            .query_row(
                "SELECT p.player_name, ps.team_name, ps.position
                 FROM player_seasons ps
                 JOIN players p ON p.player_id = ps.player_id
                 WHERE ps.player_id = ?1 AND ps.season_year = ?2",
                params![player_id, season - 1],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to query player profile")?;

        match bio {
            Some((name, team, position)) => {
                let stats = Self::load_stats(&conn, player_id, season - 1)?;
                Ok(Some((name, team, position, stats)))
            }
            None => Ok(None),
        }
    }

    fn fetch_roster(&self, team: &str, season: i32, exclude_player_id: i64) -> Result<Vec<(i64, String, StatMap)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT cur.player_id, p.player_name
                 FROM player_seasons cur
                 JOIN player_seasons prev
                   ON prev.player_id = cur.player_id
                  AND prev.season_year = cur.season_year - 1
                 JOIN players p ON p.player_id = cur.player_id
                 WHERE cur.team_name = ?1
                   AND cur.season_year = ?2
                   AND cur.player_id <> ?3
                 ORDER BY cur.player_id",
            )
            .context("failed to prepare roster query")?;

        let rows = stmt
            .query_map(params![team, season, exclude_player_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to query roster")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map roster rows")?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, name) in rows {
            let stats = Self::load_stats(&conn, id, season - 1)?;
            out.push((id, name, stats));
        }
        Ok(out)
    }
}

/// Build a stat vector holding exactly `columns`. A NULL value becomes NaN;
/// a column with no row at all is a `Schema` error.
fn build_vector(
    owner_id: i64,
    owner_name: &str,
    season: i32,
    position: &str,
    stats: &StatMap,
    columns: &[String],
) -> crate::error::Result<StatVector> {
    let mut v = StatVector::new(owner_id, owner_name, season, EntityType::Player, Some(position.to_string()));
    for col in columns {
        match stats.get(col) {
            Some(value) => v.insert(col.clone(), value.unwrap_or(f64::NAN)),
            None => return Err(ValuationError::schema(col, v.describe())),
        }
    }
    Ok(v)
}

impl PopulationRepository for Database {
    fn population(
        &self,
        season: i32,
        position: &str,
        columns: &[String],
        filter: &PopulationFilter,
    ) -> crate::error::Result<Vec<PopulationRow>> {
        let fetched = self.fetch_population(season, position, filter)?;
        let mut rows = Vec::with_capacity(fetched.len());
        for (raw, stats) in fetched {
            let vector = build_vector(
                raw.player_id,
                &raw.player_name,
                raw.season_year,
                position,
                &stats,
                columns,
            )?;
            rows.push(PopulationRow {
                stats: vector,
                team_name: raw.team_name,
                team_cluster: raw.team_cluster,
                player_cluster: raw.player_cluster,
            });
        }
        debug!(season, position, rows = rows.len(), "loaded population");
        Ok(rows)
    }

    fn candidates(
        &self,
        season: i32,
        position: &str,
        columns: &[String],
        min_minutes: f64,
    ) -> crate::error::Result<Vec<CandidateRecord>> {
        let fetched = self.fetch_candidates(season, position, min_minutes)?;
        fetched
            .into_iter()
            .map(|(id, name, previous_team, new_team, stats)| {
                Ok(CandidateRecord {
                    stats: build_vector(id, &name, season - 1, position, &stats, columns)?,
                    previous_team,
                    new_team,
                })
            })
            .collect()
    }

    fn player_profile(
        &self,
        season: i32,
        player_id: i64,
        columns: &[String],
    ) -> crate::error::Result<PlayerProfile> {
        let Some((name, team_name, position, stats)) = self.fetch_profile(season, player_id)? else {
            return Err(ValuationError::empty(format!(
                "player {player_id} has no {} season on record",
                season - 1
            )));
        };
        let stats = build_vector(player_id, &name, season - 1, &position, &stats, columns)?;
        Ok(PlayerProfile {
            stats,
            team_name,
            position,
        })
    }

    fn incoming_roster(
        &self,
        team: &str,
        season: i32,
        exclude_player_id: i64,
    ) -> crate::error::Result<Vec<RosterLine>> {
        let box_columns: Vec<String> = ROSTER_BOX_COLUMNS.iter().map(|s| s.to_string()).collect();
        let mut roster = Vec::new();
        for (id, name, stats) in self.fetch_roster(team, season, exclude_player_id)? {
            let line = build_vector(id, &name, season - 1, "", &stats, &box_columns)
                .and_then(|v| {
                    if v.has_non_finite(&box_columns) {
                        Err(ValuationError::schema("box totals", v.describe()))
                    } else {
                        RosterLine::from_stats(&v)
                    }
                });
            match line {
                Ok(line) => roster.push(line),
                Err(e) => warn!(player_id = id, team, "skipping roster player: {e}"),
            }
        }
        Ok(roster)
    }

    fn cluster_sample_size(
        &self,
        season: i32,
        position: &str,
        team_cluster: i64,
        player_cluster: i64,
        filter: &PopulationFilter,
    ) -> crate::error::Result<usize> {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*)
                 FROM player_seasons ps
                 JOIN cluster_assignments ca
                   ON ca.player_id = ps.player_id
                  AND ca.season_year = ps.season_year
                  AND ca.model_season = ?1
                 WHERE ps.season_year >= ?1 - ?2
                   AND ps.season_year < ?1
                   AND ps.position = ?3
                   AND ps.bpm > ?4
                   AND ca.team_cluster = ?5
                   AND ca.player_cluster = ?6",
                params![
                    season,
                    filter.lookback_years,
                    position,
                    filter.min_bpm,
                    team_cluster,
                    player_cluster,
                ],
                |row| row.get(0),
            )
            .context("failed to count cluster sample")?;
        Ok(count as usize)
    }
}
