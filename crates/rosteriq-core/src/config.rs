// Configuration loading and validation (engine.toml).

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::valuation::ranking::CompositeRanker;
use crate::valuation::weights::{AdaptiveK, Kernel};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub data: DataConfig,
    pub positions: PositionsConfig,
    pub population: PopulationConfig,
    pub matching: MatchingConfig,
    pub benchmark: BenchmarkConfig,
    pub scoring: ScoringConfig,
    pub composite: CompositeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub db_path: String,
    pub artifacts_dir: String,
    #[serde(default)]
    pub labels_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionsConfig {
    pub codes: Vec<String>,
    /// Per-position floor on the number of player clusters blended.
    #[serde(default)]
    pub min_player_k: HashMap<String, usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PopulationConfig {
    pub lookback_years: i32,
    pub min_bpm: f64,
    pub candidate_min_minutes: f64,
}

/// Matching parameters with kernels already resolved.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub team_k: usize,
    pub player_k: usize,
    pub adaptive_k: bool,
    pub sample_size_threshold: usize,
    pub team_kernel: Kernel,
    pub player_kernel: Kernel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkConfig {
    pub fit_columns: Vec<String>,
    pub value_columns: Vec<String>,
    /// ESS below this is reported as low confidence.
    pub min_ess: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub flip_stats: Vec<String>,
    #[serde(default)]
    pub stat_weights: HashMap<String, HashMap<String, f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompositeConfig {
    pub fit_weight: f64,
    pub value_weight: f64,
    pub cap: f64,
    #[serde(default = "default_t_scale")]
    pub t_scale: bool,
}

fn default_t_scale() -> bool {
    true
}

impl Config {
    pub fn adaptive_k(&self) -> AdaptiveK {
        AdaptiveK {
            enabled: self.matching.adaptive_k,
            threshold: self.matching.sample_size_threshold,
        }
    }

    pub fn ranker(&self) -> CompositeRanker {
        CompositeRanker {
            fit_weight: self.composite.fit_weight,
            value_weight: self.composite.value_weight,
            cap: self.composite.cap,
            t_scale: self.composite.t_scale,
        }
    }

    pub fn flip_set(&self) -> HashSet<String> {
        self.scoring.flip_stats.iter().cloned().collect()
    }

    /// Stat-weight table for a position; empty (all weights 1) when absent.
    pub fn stat_weights_for(&self, position: &str) -> HashMap<String, f64> {
        self.scoring
            .stat_weights
            .get(position)
            .cloned()
            .unwrap_or_default()
    }

    pub fn min_player_k(&self, position: &str) -> Option<usize> {
        self.positions.min_player_k.get(position).copied()
    }
}

// ---------------------------------------------------------------------------
// engine.toml raw structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct EngineFile {
    data: DataConfig,
    positions: PositionsConfig,
    population: PopulationConfig,
    matching: MatchingSection,
    benchmark: BenchmarkConfig,
    scoring: ScoringConfig,
    composite: CompositeConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct MatchingSection {
    team_k: usize,
    player_k: usize,
    #[serde(default)]
    adaptive_k: bool,
    sample_size_threshold: usize,
    team_kernel: KernelSection,
    player_kernel: KernelSection,
}

#[derive(Debug, Clone, Deserialize)]
struct KernelSection {
    method: String,
    #[serde(default = "default_power")]
    power: f64,
    #[serde(default)]
    alpha: Option<f64>,
}

fn default_power() -> f64 {
    2.0
}

fn resolve_kernel(field: &str, section: &KernelSection) -> Result<Kernel, ConfigError> {
    let kernel = Kernel::from_method(&section.method, section.power, section.alpha)
        .map_err(|e| invalid(&format!("{field}.method"), e.to_string()))?;
    if let Kernel::InversePow { power } = kernel {
        if power.is_nan() || power <= 0.0 {
            return Err(invalid(
                &format!("{field}.power"),
                format!("must be > 0, got {power}"),
            ));
        }
    }
    if let Some(alpha) = section.alpha {
        if alpha.is_nan() || alpha <= 0.0 {
            return Err(invalid(
                &format!("{field}.alpha"),
                format!("must be > 0, got {alpha}"),
            ));
        }
    }
    Ok(kernel)
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Parse and validate configuration text. `path` is only used in errors.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let file: EngineFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let matching = MatchingConfig {
        team_k: file.matching.team_k,
        player_k: file.matching.player_k,
        adaptive_k: file.matching.adaptive_k,
        sample_size_threshold: file.matching.sample_size_threshold,
        team_kernel: resolve_kernel("matching.team_kernel", &file.matching.team_kernel)?,
        player_kernel: resolve_kernel("matching.player_kernel", &file.matching.player_kernel)?,
    };

    let config = Config {
        data: file.data,
        positions: file.positions,
        population: file.population,
        matching,
        benchmark: file.benchmark,
        scoring: file.scoring,
        composite: file.composite,
    };

    validate(&config)?;
    Ok(config)
}

/// Load and validate `config/engine.toml` relative to `base_dir`.
///
/// Does not copy defaults; prefer `load_config()` which does.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("engine.toml");
    let text = read_file(&path)?;
    parse_config(&text, &path)
}

/// Install the shipped defaults: every file in `defaults/` without a
/// counterpart in `config/` is copied over. Existing `config/` files are left
/// alone and `.example` templates are never installed. Returns the installed
/// paths.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");
    let copy_err = |message: String| ConfigError::DefaultsCopyError { message };

    if !defaults_dir.is_dir() {
        if config_dir.is_dir() {
            return Ok(Vec::new());
        }
        return Err(copy_err(format!(
            "no defaults/ or config/ under {}; rosteriq reads config/engine.toml \
             from the working directory",
            base_dir.display()
        )));
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| copy_err(format!("cannot create {}: {e}", config_dir.display())))?;
    let entries = std::fs::read_dir(&defaults_dir)
        .map_err(|e| copy_err(format!("cannot list {}: {e}", defaults_dir.display())))?;

    let mut installed = Vec::new();
    for entry in entries {
        let source = entry
            .map_err(|e| copy_err(format!("cannot list {}: {e}", defaults_dir.display())))?
            .path();
        let Some(name) = source.file_name().filter(|_| source.is_file()) else {
            continue;
        };
        if name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(name);
        if install_default(&source, &target)? {
            installed.push(target);
        }
    }
    Ok(installed)
}

/// Copy `source` to `target` unless `target` already exists. Returns whether
/// a file was written.
fn install_default(source: &Path, target: &Path) -> Result<bool, ConfigError> {
    let copy_err = |message: String| ConfigError::DefaultsCopyError { message };
    let mut dest = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(copy_err(format!("cannot create {}: {e}", target.display()))),
    };
    let content = std::fs::read(source)
        .map_err(|e| copy_err(format!("cannot read default {}: {e}", source.display())))?;
    std::io::Write::write_all(&mut dest, &content)
        .map_err(|e| copy_err(format!("cannot write {}: {e}", target.display())))?;
    Ok(true)
}

/// Loads config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let codes = &config.positions.codes;
    if codes.is_empty() {
        return Err(invalid("positions.codes", "must list at least one position"));
    }
    for (pos, k) in &config.positions.min_player_k {
        if !codes.contains(pos) {
            return Err(invalid(
                "positions.min_player_k",
                format!("unknown position `{pos}`"),
            ));
        }
        if *k == 0 {
            return Err(invalid(
                &format!("positions.min_player_k.{pos}"),
                "must be greater than 0",
            ));
        }
    }

    if config.population.lookback_years <= 0 {
        return Err(invalid("population.lookback_years", "must be greater than 0"));
    }
    if config.population.candidate_min_minutes < 0.0 {
        return Err(invalid("population.candidate_min_minutes", "must be >= 0"));
    }

    let m = &config.matching;
    if m.team_k == 0 {
        return Err(invalid("matching.team_k", "must be greater than 0"));
    }
    if m.player_k == 0 {
        return Err(invalid("matching.player_k", "must be greater than 0"));
    }

    if config.benchmark.fit_columns.is_empty() {
        return Err(invalid("benchmark.fit_columns", "must not be empty"));
    }
    if config.benchmark.value_columns.is_empty() {
        return Err(invalid("benchmark.value_columns", "must not be empty"));
    }
    if config.benchmark.min_ess < 0.0 {
        return Err(invalid("benchmark.min_ess", "must be >= 0"));
    }

    for (pos, table) in &config.scoring.stat_weights {
        if !codes.contains(pos) {
            return Err(invalid(
                "scoring.stat_weights",
                format!("table for unknown position `{pos}`"),
            ));
        }
        for (stat, w) in table {
            if w.is_nan() || *w < 0.0 {
                return Err(invalid(
                    &format!("scoring.stat_weights.{pos}.{stat}"),
                    format!("must be >= 0, got {w}"),
                ));
            }
        }
        // Unlisted value columns weigh 1.0.
        let total: f64 = config
            .benchmark
            .value_columns
            .iter()
            .map(|c| table.get(c).copied().unwrap_or(1.0))
            .sum();
        if total <= 0.0 {
            return Err(invalid(
                &format!("scoring.stat_weights.{pos}"),
                "weights over benchmark.value_columns sum to 0",
            ));
        }
    }

    let c = &config.composite;
    if c.cap.is_nan() || c.cap <= 0.0 {
        return Err(invalid("composite.cap", format!("must be > 0, got {}", c.cap)));
    }
    if c.fit_weight < 0.0 || c.value_weight < 0.0 {
        return Err(invalid("composite", "blend weights must be >= 0"));
    }
    if c.fit_weight == 0.0 && c.value_weight == 0.0 {
        return Err(invalid("composite", "fit_weight and value_weight cannot both be 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    fn default_text() -> String {
        fs::read_to_string(project_root().join("defaults/engine.toml")).unwrap()
    }

    fn parse(text: &str) -> Result<Config, ConfigError> {
        parse_config(text, Path::new("engine.toml"))
    }

    fn expect_field(result: Result<Config, ConfigError>, expected: &str) {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, expected),
            Err(other) => panic!("expected ValidationError for {expected}, got: {other}"),
            Ok(_) => panic!("expected ValidationError for {expected}, got Ok"),
        }
    }

    #[test]
    fn load_defaults() {
        let config = parse(&default_text()).expect("defaults should be valid");

        assert_eq!(config.positions.codes, vec!["G", "F", "C"]);
        assert_eq!(config.min_player_k("C"), Some(2));
        assert_eq!(config.min_player_k("G"), None);
        assert_eq!(config.population.lookback_years, 3);
        assert!((config.population.min_bpm + 2.0).abs() < f64::EPSILON);
        assert_eq!(config.matching.team_k, 1);
        assert_eq!(config.matching.player_k, 2);
        assert_eq!(config.matching.sample_size_threshold, 30);
        assert_eq!(config.matching.player_kernel, Kernel::InversePow { power: 1.5 });
        assert_eq!(config.benchmark.fit_columns.len(), 7);
        assert_eq!(config.benchmark.value_columns.len(), 7);
        assert!((config.stat_weights_for("G")["ast_percent"] - 1.5).abs() < f64::EPSILON);
        assert!(config.stat_weights_for("X").is_empty());
        assert!(config.flip_set().contains("tov_percent"));

        let ranker = config.ranker();
        assert!((ranker.fit_weight - 0.6).abs() < f64::EPSILON);
        assert!((ranker.cap - 3.5).abs() < f64::EPSILON);
        assert!(ranker.t_scale);
    }

    #[test]
    fn rejects_unknown_kernel_method() {
        let text = default_text().replacen("method = \"inverse_pow\"", "method = \"cosine\"", 1);
        expect_field(parse(&text), "matching.team_kernel.method");
    }

    #[test]
    fn rejects_non_positive_power() {
        let text = default_text().replace("power = 1.5", "power = 0.0");
        expect_field(parse(&text), "matching.player_kernel.power");
    }

    #[test]
    fn rejects_zero_k() {
        let text = default_text().replace("team_k = 1", "team_k = 0");
        expect_field(parse(&text), "matching.team_k");
    }

    #[test]
    fn rejects_empty_positions() {
        let text = default_text().replace("codes = [\"G\", \"F\", \"C\"]", "codes = []");
        expect_field(parse(&text), "positions.codes");
    }

    #[test]
    fn rejects_weights_for_unknown_position() {
        let text = default_text().replace("codes = [\"G\", \"F\", \"C\"]", "codes = [\"G\", \"F\"]");
        // C appears in min_player_k first.
        expect_field(parse(&text), "positions.min_player_k");
    }

    #[test]
    fn rejects_negative_stat_weight() {
        let text = default_text().replace("ast_percent = 1.5", "ast_percent = -1.5");
        expect_field(parse(&text), "scoring.stat_weights.G.ast_percent");
    }

    #[test]
    fn rejects_all_zero_stat_weights() {
        let start = default_text().find("[scoring.stat_weights.C]").unwrap();
        let end = default_text().find("[composite]").unwrap();
        let zeros: String = ["ast", "oreb", "dreb", "ft", "stl", "blk", "ts"]
            .iter()
            .map(|s| format!("{s}_percent = 0.0\n"))
            .collect();
        let mut text = default_text();
        text.replace_range(start..end, &format!("[scoring.stat_weights.C]\n{zeros}\n"));
        expect_field(parse(&text), "scoring.stat_weights.C");
    }

    #[test]
    fn rejects_zero_cap() {
        let text = default_text().replace("cap = 3.5", "cap = 0.0");
        expect_field(parse(&text), "composite.cap");
    }

    #[test]
    fn rejects_both_blend_weights_zero() {
        let text = default_text()
            .replace("fit_weight = 0.6", "fit_weight = 0.0")
            .replace("value_weight = 0.4", "value_weight = 0.0");
        expect_field(parse(&text), "composite");
    }

    #[test]
    fn rejects_empty_value_columns() {
        let start = default_text();
        let line = start
            .lines()
            .find(|l| l.starts_with("value_columns"))
            .unwrap()
            .to_string();
        let text = start.replace(&line, "value_columns = []");
        expect_field(parse(&text), "benchmark.value_columns");
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let err = parse("[data\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn file_not_found_for_missing_engine_toml() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        let err = load_config_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn ensure_config_files_copies_then_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let defaults_dir = tmp.path().join("defaults");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::write(defaults_dir.join("engine.toml"), default_text()).unwrap();
        fs::write(defaults_dir.join("notes.toml.example"), "# template\n").unwrap();

        let copied = ensure_config_files(tmp.path()).expect("should copy defaults");
        assert_eq!(copied.len(), 1);
        assert!(tmp.path().join("config/engine.toml").exists());
        assert!(!tmp.path().join("config/notes.toml.example").exists());

        let config = load_config_from(tmp.path()).expect("copied config should load");
        assert_eq!(config.data.db_path, "rosteriq.db");
    }

    #[test]
    fn ensure_config_files_skips_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let defaults_dir = tmp.path().join("defaults");
        let config_dir = tmp.path().join("config");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(defaults_dir.join("engine.toml"), default_text()).unwrap();
        fs::write(config_dir.join("engine.toml"), "# custom\n").unwrap();

        let copied = ensure_config_files(tmp.path()).unwrap();
        assert!(copied.is_empty());
        assert_eq!(
            fs::read_to_string(config_dir.join("engine.toml")).unwrap(),
            "# custom\n"
        );
    }

    #[test]
    fn ensure_config_files_errors_when_both_dirs_missing() {
        let tmp = tempfile::tempdir().unwrap();
        match ensure_config_files(tmp.path()).unwrap_err() {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("no defaults/ or config/"));
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }
    }
}
