// Human-readable archetype labels keyed by season, scope and cluster id.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValuationError};

/// Name and short rationale for one archetype cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchetypeLabel {
    pub label: String,
    #[serde(default)]
    pub rationale: String,
}

/// Advisory lookup used only when reporting. Scope is a position code for
/// player clusters or `team` for team clusters.
pub trait LabelService: Send + Sync {
    fn label(&self, season: i32, scope: &str, cluster_id: i64) -> Option<ArchetypeLabel>;
}

/// Labels loaded from a JSON document
/// `{ "<season>": { "<scope>": { "<cluster_id>": {"label", "rationale"} } } }`.
#[derive(Debug, Clone, Default)]
pub struct JsonLabelService {
    labels: HashMap<String, HashMap<String, HashMap<String, ArchetypeLabel>>>,
}

impl JsonLabelService {
    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self {
            labels: serde_json::from_str(text)?,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ValuationError::artifact(path, format!("cannot read labels: {e}")))?;
        Self::from_json(&text).map_err(|e| ValuationError::artifact(path, format!("invalid labels JSON: {e}")))
    }
}

impl LabelService for JsonLabelService {
    fn label(&self, season: i32, scope: &str, cluster_id: i64) -> Option<ArchetypeLabel> {
        self.labels
            .get(&season.to_string())?
            .get(scope)?
            .get(&cluster_id.to_string())
            .cloned()
    }
}
