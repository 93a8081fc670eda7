// Archetype cluster profiles and distance ranking.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ValuationError};
use crate::stats::EntityType;

/// A pre-computed archetype centroid in PCA space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster_id: i64,
    pub centroid: Vec<f64>,
    pub entity_type: EntityType,
}

/// Distance from a projected vector to one cluster centroid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterDistance {
    pub cluster_id: i64,
    pub distance: f64,
}

/// Euclidean distance between two equal-length slices.
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Rank every profile by Euclidean distance to `point`, nearest first.
///
/// Ties are broken by ascending `cluster_id` so the ranking is deterministic.
/// A centroid whose dimension differs from `point` is a `Schema` error.
pub fn rank_clusters(point: &[f64], profiles: &[ClusterProfile]) -> Result<Vec<ClusterDistance>> {
    let mut ranked = Vec::with_capacity(profiles.len());
    for profile in profiles {
        if profile.centroid.len() != point.len() {
            return Err(ValuationError::schema(
                format!("PC{}", profile.centroid.len().max(point.len())),
                format!(
                    "{} cluster {} centroid ({} dims vs {} projected)",
                    profile.entity_type,
                    profile.cluster_id,
                    profile.centroid.len(),
                    point.len()
                ),
            ));
        }
        ranked.push(ClusterDistance {
            cluster_id: profile.cluster_id,
            distance: euclidean(point, &profile.centroid),
        });
    }

    ranked.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then(a.cluster_id.cmp(&b.cluster_id))
    });

    for entry in ranked.iter().take(3) {
        debug!(cluster = entry.cluster_id, distance = entry.distance, "cluster distance");
    }
    Ok(ranked)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
