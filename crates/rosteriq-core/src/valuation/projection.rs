// PCA projection of raw stat vectors into a pre-fit component space.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValuationError};
use crate::stats::StatVector;

/// Persisted PCA parameters: per-feature center/scale plus a rotation matrix
/// with one row per feature and one column per component.
///
/// A model with an identity rotation projects into the scaled feature space
/// itself (team archetypes are clustered that way).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaModel {
    pub features: Vec<String>,
    pub center: Vec<f64>,
    pub scale: Vec<f64>,
    pub rotation: Vec<Vec<f64>>,
}

impl PcaModel {
    /// Build a model, checking that every parameter has one entry per feature
    /// and that the rotation is rectangular.
    pub fn new(
        features: Vec<String>,
        center: Vec<f64>,
        scale: Vec<f64>,
        rotation: Vec<Vec<f64>>,
    ) -> std::result::Result<Self, String> {
        let n = features.len();
        if n == 0 {
            return Err("model has no features".into());
        }
        if center.len() != n || scale.len() != n {
            return Err(format!(
                "center/scale length ({}/{}) does not match {} features",
                center.len(),
                scale.len(),
                n
            ));
        }
        if rotation.len() != n {
            return Err(format!(
                "rotation has {} rows, expected {}",
                rotation.len(),
                n
            ));
        }
        let components = rotation[0].len();
        if components == 0 || rotation.iter().any(|row| row.len() != components) {
            return Err("rotation rows must share a non-zero component count".into());
        }
        Ok(Self {
            features,
            center,
            scale,
            rotation,
        })
    }

    /// Center/scale only: the rotation is the identity.
    pub fn scaling_only(
        features: Vec<String>,
        center: Vec<f64>,
        scale: Vec<f64>,
    ) -> std::result::Result<Self, String> {
        let n = features.len();
        let rotation = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        Self::new(features, center, scale, rotation)
    }

    pub fn components(&self) -> usize {
        self.rotation.first().map_or(0, Vec::len)
    }

    /// Project `raw` into component space.
    ///
    /// The vector's stat names must be exactly the fitted feature set; any
    /// missing or extra stat is a `Schema` error. A zero scale is treated as 1.
    pub fn project(&self, raw: &StatVector) -> Result<Vec<f64>> {
        if let Some(extra) = raw.names().find(|name| !self.features.iter().any(|f| f == name)) {
            return Err(ValuationError::schema(
                extra,
                format!("fitted PCA features (unexpected stat on {})", raw.describe()),
            ));
        }
        let values = raw.select(&self.features)?;
        Ok(self.project_values(&values))
    }

    /// Project values already laid out in fitted feature order.
    pub fn project_values(&self, values: &[f64]) -> Vec<f64> {
        let scaled: Vec<f64> = values
            .iter()
            .zip(self.center.iter().zip(&self.scale))
            .map(|(x, (c, s))| (x - c) / if *s == 0.0 { 1.0 } else { *s })
            .collect();

        let mut out = vec![0.0; self.components()];
        for (x, row) in scaled.iter().zip(&self.rotation) {
            for (acc, loading) in out.iter_mut().zip(row) {
                *acc += x * loading;
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::EntityType;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn model() -> PcaModel {
        PcaModel::new(
            vec!["ts_percent".into(), "ast_percent".into()],
            vec![0.5, 20.0],
            vec![0.1, 5.0],
            vec![vec![1.0, 0.5], vec![-1.0, 0.5]],
        )
        .unwrap()
    }

    fn player(ts: f64, ast: f64) -> StatVector {
        StatVector::new(1, "P", 2024, EntityType::Player, Some("G".into()))
            .with_stat("ts_percent", ts)
            .with_stat("ast_percent", ast)
    }

    #[test]
    fn project_centers_scales_and_rotates() {
        // scaled = [(0.6-0.5)/0.1, (30-20)/5] = [1, 2]
        // PC1 = 1*1 + 2*-1 = -1 ; PC2 = 1*0.5 + 2*0.5 = 1.5
        let pc = model().project(&player(0.6, 30.0)).unwrap();
        assert_eq!(pc.len(), 2);
        assert!(approx_eq(pc[0], -1.0, 1e-12));
        assert!(approx_eq(pc[1], 1.5, 1e-12));
    }

    #[test]
    fn project_rejects_missing_feature() {
        let raw = StatVector::new(1, "P", 2024, EntityType::Player, None).with_stat("ts_percent", 0.5);
        let err = model().project(&raw).unwrap_err();
        assert!(matches!(err, ValuationError::Schema { ref column, .. } if column == "ast_percent"));
    }

    #[test]
    fn project_rejects_extra_feature() {
        let raw = player(0.5, 20.0).with_stat("blk_percent", 3.0);
        let err = model().project(&raw).unwrap_err();
        assert!(matches!(err, ValuationError::Schema { ref column, .. } if column == "blk_percent"));
    }

    #[test]
    fn zero_scale_treated_as_one() {
        let m = PcaModel::scaling_only(vec!["x".into()], vec![2.0], vec![0.0]).unwrap();
        assert_eq!(m.project_values(&[5.0]), vec![3.0]);
    }

    #[test]
    fn scaling_only_is_identity_rotation() {
        let m = PcaModel::scaling_only(
            vec!["a".into(), "b".into()],
            vec![1.0, 1.0],
            vec![2.0, 4.0],
        )
        .unwrap();
        assert_eq!(m.project_values(&[3.0, 9.0]), vec![1.0, 2.0]);
    }

    #[test]
    fn new_rejects_ragged_rotation() {
        let err = PcaModel::new(
            vec!["a".into(), "b".into()],
            vec![0.0, 0.0],
            vec![1.0, 1.0],
            vec![vec![1.0, 0.0], vec![1.0]],
        );
        assert!(err.is_err());
    }
}
