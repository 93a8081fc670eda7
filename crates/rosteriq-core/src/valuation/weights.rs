// Similarity weighting over ranked cluster distances, with adaptive k.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ValuationError};
use crate::valuation::cluster::ClusterDistance;

/// Additive guard inside the inverse kernels.
pub const KERNEL_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Weighted cluster assignment
// ---------------------------------------------------------------------------

/// Mapping `cluster_id -> weight`.
///
/// Weights sum to 1 only after [`WeightedClusterAssignment::normalize`];
/// construction does not enforce it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedClusterAssignment {
    weights: BTreeMap<i64, f64>,
}

impl WeightedClusterAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single cluster with weight 1.
    pub fn single(cluster_id: i64) -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(cluster_id, 1.0);
        Self { weights }
    }

    pub fn insert(&mut self, cluster_id: i64, weight: f64) {
        self.weights.insert(cluster_id, weight);
    }

    /// Weight of `cluster_id`, 0 if absent.
    pub fn get(&self, cluster_id: i64) -> f64 {
        self.weights.get(&cluster_id).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.weights.iter().map(|(id, w)| (*id, *w))
    }

    pub fn cluster_ids(&self) -> Vec<i64> {
        self.weights.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Heaviest cluster; ties go to the lower id.
    pub fn dominant(&self) -> Option<i64> {
        self.weights
            .iter()
            .fold(None, |best: Option<(i64, f64)>, (id, w)| match best {
                Some((_, bw)) if bw >= *w => best,
                _ => Some((*id, *w)),
            })
            .map(|(id, _)| id)
    }

    /// Rescale so the weights sum to 1.
    ///
    /// Negative weights are not allowed. A total that is zero or not finite is
    /// a `DegenerateWeight` error.
    pub fn normalize(&self) -> Result<Self> {
        if let Some((id, w)) = self.iter().find(|(_, w)| *w < 0.0 || w.is_nan()) {
            return Err(ValuationError::degenerate(format!(
                "cluster {id} has invalid weight {w}"
            )));
        }
        let total = self.total();
        if !(total.is_finite() && total > 0.0) {
            return Err(ValuationError::degenerate(format!(
                "cluster weights sum to {total}"
            )));
        }
        Ok(Self {
            weights: self.weights.iter().map(|(id, w)| (*id, w / total)).collect(),
        })
    }
}

impl FromIterator<(i64, f64)> for WeightedClusterAssignment {
    fn from_iter<I: IntoIterator<Item = (i64, f64)>>(iter: I) -> Self {
        Self {
            weights: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

/// Distance-to-similarity transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    /// `1 / (d^power + eps)`
    InversePow { power: f64 },
    /// `1 / (d + eps)`
    Inverse,
    /// `exp(-alpha * d)`; alpha defaults to `1 / median(d)`.
    Rbf { alpha: Option<f64> },
}

impl Kernel {
    /// Resolve a configured method name. Unknown names fail with `UnknownMethod`.
    pub fn from_method(method: &str, power: f64, alpha: Option<f64>) -> Result<Kernel> {
        match method {
            "inverse_pow" => Ok(Kernel::InversePow { power }),
            "inverse" => Ok(Kernel::Inverse),
            "rbf" => Ok(Kernel::Rbf { alpha }),
            other => Err(ValuationError::UnknownMethod(other.to_string())),
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            Kernel::InversePow { .. } => "inverse_pow",
            Kernel::Inverse => "inverse",
            Kernel::Rbf { .. } => "rbf",
        }
    }

    fn similarities(&self, distances: &[f64]) -> Vec<f64> {
        match *self {
            Kernel::InversePow { power } => distances
                .iter()
                .map(|d| 1.0 / (d.powf(power) + KERNEL_EPSILON))
                .collect(),
            Kernel::Inverse => distances
                .iter()
                .map(|d| 1.0 / (d + KERNEL_EPSILON))
                .collect(),
            Kernel::Rbf { alpha } => {
                let alpha = alpha.unwrap_or_else(|| 1.0 / median(distances).max(KERNEL_EPSILON));
                distances.iter().map(|d| (-alpha * d).exp()).collect()
            }
        }
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Convert the top `k` of a distance ranking into normalized weights.
///
/// `ranked` must already be sorted nearest-first (see
/// [`rank_clusters`](crate::valuation::cluster::rank_clusters)). A `k` larger
/// than the ranking uses every entry.
pub fn assign_weights(
    ranked: &[ClusterDistance],
    k: usize,
    kernel: Kernel,
) -> Result<WeightedClusterAssignment> {
    let k = k.max(1).min(ranked.len());
    if k == 0 {
        return Err(ValuationError::empty("no clusters to weight"));
    }
    let top = &ranked[..k];
    let distances: Vec<f64> = top.iter().map(|r| r.distance).collect();
    let sims = kernel.similarities(&distances);

    let raw: WeightedClusterAssignment = top
        .iter()
        .zip(sims)
        .map(|(r, s)| (r.cluster_id, s))
        .collect();
    let weights = raw.normalize()?;
    debug!(method = kernel.method_name(), k, ?weights, "assigned cluster weights");
    Ok(weights)
}

// ---------------------------------------------------------------------------
// Adaptive k
// ---------------------------------------------------------------------------

/// Widens k from 1 to 2 when the nearest cluster is thinly populated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveK {
    pub enabled: bool,
    /// Sample size at or below which the nearest cluster is considered thin.
    pub threshold: usize,
}

impl AdaptiveK {
    /// Pick k given the nearest cluster's matched sample size and an optional
    /// per-group floor. When disabled, `fallback_k` is used as-is (still
    /// subject to the floor).
    pub fn choose(&self, nearest_sample_size: usize, floor: Option<usize>, fallback_k: usize) -> usize {
        let k = if self.enabled {
            if nearest_sample_size <= self.threshold {
                2
            } else {
                1
            }
        } else {
            fallback_k.max(1)
        };
        floor.map_or(k, |f| k.max(f))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
