// Model artifact store: persisted PCA parameters and cluster centroids.
//
// Layout under the artifact root, per season and entity type:
//
//   <season>/<team|player>/pca_params[_<POS>].json
//   <season>/<team|player>/pca_rotation[_<POS>].json   (optional)
//   <season>/<team|player>/cluster_profiles[_<POS>].csv

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, ValuationError};
use crate::stats::EntityType;
use crate::valuation::cluster::ClusterProfile;
use crate::valuation::projection::PcaModel;

/// Read-only source of fitted model artifacts.
pub trait ModelArtifactStore: Send + Sync {
    fn load_pca(&self, season: i32, entity: EntityType, position: Option<&str>) -> Result<PcaModel>;

    fn load_cluster_profiles(
        &self,
        season: i32,
        entity: EntityType,
        position: Option<&str>,
    ) -> Result<Vec<ClusterProfile>>;
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawPcaParams {
    center: Vec<f64>,
    scale: Vec<f64>,
    #[serde(default)]
    features: Option<Vec<String>>,
}

/// Artifacts read from a directory tree.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, season: i32, entity: EntityType, stem: &str, position: Option<&str>, ext: &str) -> PathBuf {
        let name = match position {
            Some(pos) => format!("{stem}_{pos}.{ext}"),
            None => format!("{stem}.{ext}"),
        };
        self.root
            .join(season.to_string())
            .join(entity.as_str())
            .join(name)
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| ValuationError::artifact(path, format!("cannot read: {e}")))
}

/// Numeric suffix of a `PC<n>` / `X<n>` column name.
fn component_index(name: &str) -> Option<u32> {
    name.strip_prefix("PC")
        .or_else(|| name.strip_prefix('X'))
        .and_then(|n| n.parse().ok())
}

/// Parse rotation records `{"feature": name, "PC1": .., ...}` into feature
/// names and a feature-by-component matrix.
fn parse_rotation(path: &Path, text: &str) -> Result<(Vec<String>, Vec<Vec<f64>>)> {
    let records: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(text)
        .map_err(|e| ValuationError::artifact(path, format!("invalid rotation JSON: {e}")))?;

    let mut features = Vec::with_capacity(records.len());
    let mut rotation = Vec::with_capacity(records.len());
    for record in &records {
        let feature = record
            .get("feature")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ValuationError::artifact(path, "rotation record without `feature`"))?;

        let mut loadings: Vec<(u32, f64)> = Vec::new();
        for (key, value) in record {
            if let Some(idx) = component_index(key) {
                let loading = value.as_f64().ok_or_else(|| {
                    ValuationError::artifact(path, format!("non-numeric loading {key} for {feature}"))
                })?;
                loadings.push((idx, loading));
            }
        }
        loadings.sort_by_key(|(idx, _)| *idx);
        features.push(feature.to_string());
        rotation.push(loadings.into_iter().map(|(_, l)| l).collect());
    }
    Ok((features, rotation))
}

/// Parse a cluster profile table: an `ID` column plus ordered centroid columns.
fn parse_profiles(path: &Path, text: &str, entity: EntityType) -> Result<Vec<ClusterProfile>> {
    let csv_err = |e: csv::Error| ValuationError::artifact(path, format!("invalid CSV: {e}"));
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers = reader.headers().map_err(csv_err)?.clone();

    let id_col = headers
        .iter()
        .position(|h| h == "ID" || h == "cluster_id")
        .ok_or_else(|| ValuationError::artifact(path, "missing `ID` column"))?;
    let mut centroid_cols: Vec<(u32, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| component_index(h).map(|idx| (idx, i)))
        .collect();
    centroid_cols.sort();
    if centroid_cols.is_empty() {
        return Err(ValuationError::artifact(path, "no PC<n> or X<n> centroid columns"));
    }

    let mut profiles = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let parse = |i: usize| -> Result<f64> {
            let cell = record.get(i).unwrap_or("").trim();
            cell.parse::<f64>().map_err(|_| {
                ValuationError::artifact(path, format!("non-numeric cell `{cell}` in column {}", &headers[i]))
            })
        };
        let id_cell = record.get(id_col).unwrap_or("").trim();
        let cluster_id = id_cell.parse::<i64>().map_err(|_| {
            ValuationError::artifact(path, format!("cluster id `{id_cell}` is not an integer"))
        })?;
        let centroid = centroid_cols
            .iter()
            .map(|(_, i)| parse(*i))
            .collect::<Result<Vec<f64>>>()?;
        profiles.push(ClusterProfile {
            cluster_id,
            centroid,
            entity_type: entity,
        });
    }
    if profiles.is_empty() {
        return Err(ValuationError::artifact(path, "no cluster profiles"));
    }
    Ok(profiles)
}

impl ModelArtifactStore for FileArtifactStore {
    fn load_pca(&self, season: i32, entity: EntityType, position: Option<&str>) -> Result<PcaModel> {
        let params_path = self.path(season, entity, "pca_params", position, "json");
        let params: RawPcaParams = serde_json::from_str(&read_text(&params_path)?)
            .map_err(|e| ValuationError::artifact(&params_path, format!("invalid JSON: {e}")))?;

        let rotation_path = self.path(season, entity, "pca_rotation", position, "json");
        let model = if rotation_path.exists() {
            let (features, rotation) = parse_rotation(&rotation_path, &read_text(&rotation_path)?)?;
            if let Some(declared) = &params.features {
                if declared != &features {
                    return Err(ValuationError::artifact(
                        &rotation_path,
                        "rotation features disagree with pca_params features",
                    ));
                }
            }
            PcaModel::new(features, params.center, params.scale, rotation)
        } else {
            let features = params.features.ok_or_else(|| {
                ValuationError::artifact(&params_path, "no rotation file and no `features` list")
            })?;
            PcaModel::scaling_only(features, params.center, params.scale)
        };
        model.map_err(|message| ValuationError::artifact(&params_path, message))
    }

    fn load_cluster_profiles(
        &self,
        season: i32,
        entity: EntityType,
        position: Option<&str>,
    ) -> Result<Vec<ClusterProfile>> {
        let path = self.path(season, entity, "cluster_profiles", position, "csv");
        parse_profiles(&path, &read_text(&path)?, entity)
    }
}

// ---------------------------------------------------------------------------
// Per-context cache
// ---------------------------------------------------------------------------

/// `(season, entity_type, position)`
pub type ArtifactKey = (i32, EntityType, Option<String>);

/// Caches artifacts per context for the lifetime of the cache. Artifacts are
/// immutable per season, so entries are never invalidated.
pub struct ArtifactCache {
    store: Box<dyn ModelArtifactStore>,
    pca: Mutex<HashMap<ArtifactKey, Arc<PcaModel>>>,
    profiles: Mutex<HashMap<ArtifactKey, Arc<Vec<ClusterProfile>>>>,
}

impl ArtifactCache {
    pub fn new(store: Box<dyn ModelArtifactStore>) -> Self {
        Self {
            store,
            pca: Mutex::new(HashMap::new()),
            profiles: Mutex::new(HashMap::new()),
        }
    }

    fn key(season: i32, entity: EntityType, position: Option<&str>) -> ArtifactKey {
        (season, entity, position.map(str::to_string))
    }

    pub fn pca(&self, season: i32, entity: EntityType, position: Option<&str>) -> Result<Arc<PcaModel>> {
        let key = Self::key(season, entity, position);
        if let Some(hit) = self.pca.lock().expect("artifact cache mutex poisoned").get(&key) {
            debug!(season, %entity, ?position, "pca cache hit");
            return Ok(Arc::clone(hit));
        }
        let model = Arc::new(self.store.load_pca(season, entity, position)?);
        info!(season, %entity, ?position, components = model.components(), "loaded PCA model");
        self.pca
            .lock()
            .expect("artifact cache mutex poisoned")
            .insert(key, Arc::clone(&model));
        Ok(model)
    }

    pub fn profiles(
        &self,
        season: i32,
        entity: EntityType,
        position: Option<&str>,
    ) -> Result<Arc<Vec<ClusterProfile>>> {
        let key = Self::key(season, entity, position);
        if let Some(hit) = self.profiles.lock().expect("artifact cache mutex poisoned").get(&key) {
            debug!(season, %entity, ?position, "cluster profile cache hit");
            return Ok(Arc::clone(hit));
        }
        let profiles = Arc::new(self.store.load_cluster_profiles(season, entity, position)?);
        info!(season, %entity, ?position, clusters = profiles.len(), "loaded cluster profiles");
        self.profiles
            .lock()
            .expect("artifact cache mutex poisoned")
            .insert(key, Arc::clone(&profiles));
        Ok(profiles)
    }

    /// Number of distinct contexts with a cached PCA model.
    pub fn cached_models(&self) -> usize {
        self.pca.lock().expect("artifact cache mutex poisoned").len()
    }
}
