// Z-score standardization fit over a reference population.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, ValuationError};
use crate::stats::{PopulationRow, StatVector};

/// Per-column `(mean, std)` fit once over a population.
///
/// `std` is stored as fitted; a zero std is replaced by 1 whenever it is used
/// as a divisor (see [`ScalerParams::sigma`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl ScalerParams {
    /// Fit over `vectors`.
    ///
    /// Uses the population standard deviation (N denominator). Non-finite
    /// cells are left out of that column's statistics. A column with no finite
    /// value at all gets mean 0 and std 1. An empty population is an error.
    pub fn fit<'a, I>(vectors: I, columns: &[String]) -> Result<Self>
    where
        I: IntoIterator<Item = &'a StatVector>,
    {
        let mut sums = vec![0.0; columns.len()];
        let mut counts = vec![0usize; columns.len()];
        let mut cells: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];
        let mut rows = 0usize;

        for v in vectors {
            rows += 1;
            for (i, value) in v.select(columns)?.into_iter().enumerate() {
                if value.is_finite() {
                    sums[i] += value;
                    counts[i] += 1;
                    cells[i].push(value);
                }
            }
        }
        if rows == 0 {
            return Err(ValuationError::empty("cannot fit scaler on an empty population"));
        }

        let mut mean = Vec::with_capacity(columns.len());
        let mut std = Vec::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            if counts[i] == 0 {
                warn!(column = %col, "no finite values when fitting scaler; using mean 0, std 1");
                mean.push(0.0);
                std.push(1.0);
                continue;
            }
            let n = counts[i] as f64;
            let m = sums[i] / n;
            let var = cells[i].iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
            mean.push(m);
            std.push(var.sqrt());
        }

        Ok(Self {
            columns: columns.to_vec(),
            mean,
            std,
        })
    }

    /// Fit over the stat vectors of population rows.
    pub fn fit_rows(rows: &[PopulationRow], columns: &[String]) -> Result<Self> {
        Self::fit(rows.iter().map(|r| &r.stats), columns)
    }

    /// Divisor for column `i`: the fitted std, or 1 when it is zero.
    pub fn sigma(&self, i: usize) -> f64 {
        let s = self.std[i];
        if s == 0.0 {
            1.0
        } else {
            s
        }
    }

    /// `(x - mean) / std` over the fitted columns, in fitted order.
    pub fn transform(&self, vector: &StatVector) -> Result<Vec<f64>> {
        let raw = vector.select(&self.columns)?;
        Ok(self.transform_values(&raw))
    }

    /// Standardize values already in fitted column order.
    pub fn transform_values(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .enumerate()
            .map(|(i, x)| (x - self.mean[i]) / self.sigma(i))
            .collect()
    }

    /// Exact inverse of [`ScalerParams::transform`].
    pub fn inverse_transform(&self, z: &[f64]) -> Result<Vec<f64>> {
        if z.len() != self.columns.len() {
            return Err(ValuationError::schema(
                self.columns.get(z.len()).cloned().unwrap_or_default(),
                format!(
                    "standardized vector of length {} (scaler has {} columns)",
                    z.len(),
                    self.columns.len()
                ),
            ));
        }
        Ok(z.iter()
            .enumerate()
            .map(|(i, v)| v * self.sigma(i) + self.mean[i])
            .collect())
    }

    /// A copy of `vector` whose fitted columns are replaced by their z-scores.
    pub fn standardize_vector(&self, vector: &StatVector) -> Result<StatVector> {
        let z = self.transform(vector)?;
        let mut out = vector.clone();
        for (col, value) in self.columns.iter().zip(z) {
            out.insert(col.clone(), value);
        }
        Ok(out)
    }

    /// Standardize every row of a population, keeping cluster labels.
    pub fn standardize_rows(&self, rows: &[PopulationRow]) -> Result<Vec<PopulationRow>> {
        rows.iter()
            .map(|row| {
                Ok(PopulationRow {
                    stats: self.standardize_vector(&row.stats)?,
                    team_name: row.team_name.clone(),
                    team_cluster: row.team_cluster,
                    player_cluster: row.player_cluster,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
