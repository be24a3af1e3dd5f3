//! # PCA Reducer
//!
//! Population-level dimensionality reduction over one batch of scored
//! records. The fit is the single synchronization point of a run: every
//! entity's feature row is collected before the model exists.

use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::derivation::{finite, sample_std_dev};
use crate::error::{EngineError, Result};
use crate::models::Metric;

/// Components at or below this variance are treated as empty
const DEGENERATE_EIGENVALUE: f64 = 1e-12;

/// A fitted, immutable projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaModel {
    pub features: Vec<Metric>,
    pub means: Vec<f64>,
    pub std_devs: Vec<f64>,
    /// One loading vector per kept component, strongest first
    pub components: Vec<Vec<f64>>,
    pub eigenvalues: Vec<f64>,
    pub rows_fitted: usize,
}

impl PcaModel {
    /// Standardize a row, imputing missing values with the column mean
    fn standardize(&self, row: &[Option<f64>]) -> Result<Vec<f64>> {
        check_width(row, self.features.len())?;
        Ok(row
            .iter()
            .zip(self.means.iter().zip(&self.std_devs))
            .map(|(value, (mean, sd))| match value.and_then(finite) {
                Some(v) => (v - mean) / sd,
                None => 0.0,
            })
            .collect())
    }

    /// Raw component scores for one row
    pub fn project(&self, row: &[Option<f64>]) -> Result<Vec<f64>> {
        let z = self.standardize(row)?;
        Ok(self
            .components
            .iter()
            .map(|loadings| loadings.iter().zip(&z).map(|(l, v)| l * v).sum::<f64>())
            .collect())
    }

    /// Score on `component` divided by √eigenvalue, i.e. on the z-score scale.
    ///
    /// `None` when the component does not exist or carries no variance.
    pub fn whitened_score(&self, row: &[Option<f64>], component: usize) -> Result<Option<f64>> {
        let Some(&eigenvalue) = self.eigenvalues.get(component) else {
            return Ok(None);
        };
        if eigenvalue <= DEGENERATE_EIGENVALUE {
            return Ok(None);
        }
        let scores = self.project(row)?;
        Ok(finite(scores[component] / eigenvalue.sqrt()))
    }
}

/// Configured feature set and component count
#[derive(Debug, Clone)]
pub struct PCAReducer {
    features: Vec<Metric>,
    components: usize,
}

impl PCAReducer {
    pub fn new(features: Vec<Metric>, components: usize) -> Self {
        Self { features, components }
    }

    pub fn features(&self) -> &[Metric] {
        &self.features
    }

    /// Fit over the batch. Fewer than two rows or no features yields no model.
    pub fn fit(&self, rows: &[Vec<Option<f64>>]) -> Result<Option<PcaModel>> {
        let width = self.features.len();
        if width == 0 || self.components == 0 || rows.len() < 2 {
            debug!("Skipping PCA fit: {} rows, {} features", rows.len(), width);
            return Ok(None);
        }
        for row in rows {
            check_width(row, width)?;
        }

        let (means, std_devs): (Vec<f64>, Vec<f64>) = (0..width)
            .map(|col| {
                let present: Vec<f64> =
                    rows.iter().filter_map(|r| r[col].and_then(finite)).collect();
                if present.is_empty() {
                    return (0.0, 1.0);
                }
                let mean = present.iter().sum::<f64>() / present.len() as f64;
                let sd = sample_std_dev(&present);
                (mean, if sd > 0.0 { sd } else { 1.0 })
            })
            .unzip();

        let standardized = DMatrix::from_fn(rows.len(), width, |i, j| match rows[i][j].and_then(finite) {
            Some(v) => (v - means[j]) / std_devs[j],
            None => 0.0,
        });

        let covariance = standardized.transpose() * &standardized / (rows.len() as f64 - 1.0);
        let eigen = SymmetricEigen::new(covariance);

        let mut order: Vec<usize> = (0..width).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let keep = self.components.min(width);
        let mut components = Vec::with_capacity(keep);
        let mut eigenvalues = Vec::with_capacity(keep);

        for &idx in order.iter().take(keep) {
            let mut loadings: Vec<f64> = eigen.eigenvectors.column(idx).iter().copied().collect();
            if loadings.iter().sum::<f64>() < 0.0 {
                loadings.iter_mut().for_each(|l| *l = -*l);
            }
            if loadings.iter().any(|l| !l.is_finite()) {
                return Err(EngineError::Pca(format!("non-finite loading in component {}", idx)));
            }
            components.push(loadings);
            // round-off can leave tiny negative eigenvalues
            eigenvalues.push(eigen.eigenvalues[idx].max(0.0));
        }

        info!("Fitted PCA on {} rows x {} features, kept {} components", rows.len(), width, keep);
        debug!("PCA eigenvalues: {:?}", eigenvalues);

        Ok(Some(PcaModel {
            features: self.features.clone(),
            means,
            std_devs,
            components,
            eigenvalues,
            rows_fitted: rows.len(),
        }))
    }
}

fn check_width(row: &[Option<f64>], width: usize) -> Result<()> {
    if row.len() != width {
        return Err(EngineError::Pca(format!(
            "feature row has {} values, model expects {}",
            row.len(),
            width
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_reducer() -> PCAReducer {
        PCAReducer::new(vec![Metric::GoalsPer60, Metric::ShotsPer60], 2)
    }

    fn rows(values: &[(f64, f64)]) -> Vec<Vec<Option<f64>>> {
        values.iter().map(|(a, b)| vec![Some(*a), Some(*b)]).collect()
    }

    #[test]
    fn test_perfectly_correlated_features() {
        let model = create_test_reducer()
            .fit(&rows(&[(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)]))
            .unwrap()
            .unwrap();

        // all variance on the first component, loadings (1/√2, 1/√2)
        assert!((model.eigenvalues[0] - 2.0).abs() < 1e-9);
        assert!(model.eigenvalues[1].abs() < 1e-9);
        for l in &model.components[0] {
            assert!((l - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
        }

        let high = model.whitened_score(&[Some(3.0), Some(6.0)], 0).unwrap().unwrap();
        let low = model.whitened_score(&[Some(1.0), Some(2.0)], 0).unwrap().unwrap();
        assert!((high - 1.0).abs() < 1e-9);
        assert!((low + 1.0).abs() < 1e-9);

        // the degenerate second component has no whitened score
        assert_eq!(model.whitened_score(&[Some(3.0), Some(6.0)], 1).unwrap(), None);
    }

    #[test]
    fn test_eigenvalues_sorted_descending() {
        let model = create_test_reducer()
            .fit(&rows(&[(1.0, 5.0), (2.0, 3.0), (4.0, 4.0), (3.0, 1.0), (0.0, 2.0)]))
            .unwrap()
            .unwrap();

        assert!(model.eigenvalues[0] >= model.eigenvalues[1]);
        // standardized covariance has trace equal to the feature count
        let trace: f64 = model.eigenvalues.iter().sum();
        assert!((trace - 2.0).abs() < 1e-9);
        assert!(model.components[0].iter().sum::<f64>() >= 0.0);
    }

    #[test]
    fn test_missing_values_are_mean_imputed() {
        let mut data = rows(&[(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)]);
        data.push(vec![None, Some(4.0)]);
        let model = create_test_reducer().fit(&data).unwrap().unwrap();

        assert!((model.means[0] - 2.0).abs() < 1e-12);
        let scores = model.project(&[None, None]).unwrap();
        assert!(scores.iter().all(|s| s.abs() < 1e-12));
    }

    #[test]
    fn test_constant_column_gets_unit_std_dev() {
        let model = create_test_reducer()
            .fit(&rows(&[(1.0, 5.0), (2.0, 5.0), (3.0, 5.0)]))
            .unwrap()
            .unwrap();
        assert_eq!(model.std_devs[1], 1.0);
    }

    #[test]
    fn test_too_few_rows_or_features_yields_no_model() {
        assert!(create_test_reducer().fit(&rows(&[(1.0, 2.0)])).unwrap().is_none());
        assert!(PCAReducer::new(vec![], 2).fit(&[vec![], vec![]]).unwrap().is_none());
    }

    #[test]
    fn test_width_mismatch_is_an_error() {
        let result = create_test_reducer().fit(&[vec![Some(1.0)], vec![Some(2.0)]]);
        assert!(matches!(result, Err(EngineError::Pca(_))));
    }
}
