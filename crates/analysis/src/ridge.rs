//! Closed-form ridge regression over homogeneous feature rows.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

pub const DEFAULT_REGULARIZATION: f64 = 1.0;

/// Everything except `Singular` is a caller error (invalid input).
#[derive(Debug, Error, PartialEq)]
pub enum RegressionError {
    #[error("no training rows")]
    Empty,
    #[error("row {row}: first feature must be 1, got {value}")]
    NotHomogeneous { row: usize, value: f64 },
    #[error("expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("{rows} feature rows but {targets} targets")]
    RowTargetMismatch { rows: usize, targets: usize },
    #[error("row {row}: non-finite value")]
    NonFinite { row: usize },
    #[error("regularization must be finite and non-negative, got {0}")]
    BadRegularization(f64),
    #[error("normal equations are singular")]
    Singular,
}

impl RegressionError {
    pub fn is_invalid_input(&self) -> bool {
        !matches!(self, RegressionError::Singular)
    }
}

/// Solves `w = (XᵗX + λI)⁻¹ Xᵗy`.
pub fn ridge_weights(
    rows: &[Vec<f64>],
    targets: &[f64],
    regularization: f64,
) -> Result<Vec<f64>, RegressionError> {
    if !regularization.is_finite() || regularization < 0.0 {
        return Err(RegressionError::BadRegularization(regularization));
    }
    if rows.len() != targets.len() {
        return Err(RegressionError::RowTargetMismatch {
            rows: rows.len(),
            targets: targets.len(),
        });
    }
    let features = rows.first().ok_or(RegressionError::Empty)?.len();
    if features == 0 {
        return Err(RegressionError::DimensionMismatch { expected: 1, got: 0 });
    }
    for (i, (row, target)) in rows.iter().zip(targets).enumerate() {
        validate_row(i, row, features)?;
        if !target.is_finite() {
            return Err(RegressionError::NonFinite { row: i });
        }
    }

    let x = DMatrix::from_fn(rows.len(), features, |r, c| rows[r][c]);
    let y = DVector::from_column_slice(targets);
    let xt = x.transpose();
    let a = &xt * &x + DMatrix::identity(features, features) * regularization;
    let b = &xt * y;

    let w = a
        .clone()
        .cholesky()
        .map(|c| c.solve(&b))
        .or_else(|| a.lu().solve(&b))
        .ok_or(RegressionError::Singular)?;
    Ok(w.iter().copied().collect())
}

fn validate_row(i: usize, row: &[f64], features: usize) -> Result<(), RegressionError> {
    if row.len() != features {
        return Err(RegressionError::DimensionMismatch {
            expected: features,
            got: row.len(),
        });
    }
    if row.iter().any(|v| !v.is_finite()) {
        return Err(RegressionError::NonFinite { row: i });
    }
    if row[0] != 1.0 {
        return Err(RegressionError::NotHomogeneous { row: i, value: row[0] });
    }
    Ok(())
}

/// A fitted ridge model together with its training data.
///
/// Rows are homogeneous: the first feature is always 1 so the bias is
/// `weights[0]`. [`add_row`](Self::add_row) only stores the example; call
/// [`fit`](Self::fit) again to fold it into the weights.
#[derive(Debug, Clone)]
pub struct RidgeRegressor {
    rows: Vec<Vec<f64>>,
    targets: Vec<f64>,
    weights: Vec<f64>,
    regularization: f64,
}

impl RidgeRegressor {
    pub fn train(
        rows: Vec<Vec<f64>>,
        targets: Vec<f64>,
        regularization: f64,
    ) -> Result<Self, RegressionError> {
        let weights = ridge_weights(&rows, &targets, regularization)?;
        Ok(Self {
            rows,
            targets,
            weights,
            regularization,
        })
    }

    /// Refits the weights over every stored row.
    pub fn fit(&mut self) -> Result<&[f64], RegressionError> {
        self.weights = ridge_weights(&self.rows, &self.targets, self.regularization)?;
        Ok(&self.weights)
    }

    pub fn add_row(&mut self, features: Vec<f64>, target: f64) -> Result<(), RegressionError> {
        validate_row(self.rows.len(), &features, self.feature_count())?;
        if !target.is_finite() {
            return Err(RegressionError::NonFinite { row: self.rows.len() });
        }
        self.rows.push(features);
        self.targets.push(target);
        Ok(())
    }

    /// `features` excludes the leading 1.
    pub fn predict(&self, features: &[f64]) -> Result<f64, RegressionError> {
        let expected = self.feature_count() - 1;
        if features.len() != expected {
            return Err(RegressionError::DimensionMismatch {
                expected,
                got: features.len(),
            });
        }
        let bias = self.weights[0];
        Ok(bias
            + self.weights[1..]
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>())
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn feature_count(&self) -> usize {
        self.weights.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn regularization(&self) -> f64 {
        self.regularization
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(x1: f64, x2: f64) -> f64 {
        2.0 + 3.0 * x1 - x2
    }

    fn plane_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for i in 0..20 {
            for j in 0..10 {
                let (x1, x2) = (i as f64 * 0.5, j as f64 * 1.5);
                rows.push(vec![1.0, x1, x2]);
                targets.push(plane(x1, x2));
            }
        }
        (rows, targets)
    }

    #[test]
    fn recovers_linear_relationship() {
        let (rows, targets) = plane_data();
        let m = RidgeRegressor::train(rows, targets, DEFAULT_REGULARIZATION).unwrap();
        let p = m.predict(&[3.3, 7.1]).unwrap();
        assert!((p - plane(3.3, 7.1)).abs() < 0.05, "got {p}");
        assert!((m.weights()[1] - 3.0).abs() < 0.01);
        assert!((m.weights()[2] + 1.0).abs() < 0.01);
    }

    #[test]
    fn zero_regularization_is_ordinary_least_squares() {
        let (rows, targets) = plane_data();
        let m = RidgeRegressor::train(rows, targets, 0.0).unwrap();
        assert!((m.weights()[0] - 2.0).abs() < 1e-8);
        assert!((m.weights()[1] - 3.0).abs() < 1e-8);
    }

    #[test]
    fn added_row_pulls_prediction_after_refit() {
        let rows = vec![vec![1.0, 0.0], vec![1.0, 1.0], vec![1.0, 2.0]];
        let targets = vec![0.0, 1.0, 2.0];
        let mut m = RidgeRegressor::train(rows, targets, 1.0).unwrap();
        let before = m.predict(&[3.0]).unwrap();

        m.add_row(vec![1.0, 3.0], 10.0).unwrap();
        assert_eq!(m.predict(&[3.0]).unwrap(), before);
        assert_eq!(m.row_count(), 4);

        m.fit().unwrap();
        let after = m.predict(&[3.0]).unwrap();
        assert!(after > before);
        assert!((10.0 - after).abs() < (10.0 - before).abs());
    }

    #[test]
    fn rejects_non_homogeneous_rows() {
        let err = RidgeRegressor::train(vec![vec![1.0, 2.0], vec![0.5, 1.0]], vec![1.0, 2.0], 1.0)
            .unwrap_err();
        assert_eq!(err, RegressionError::NotHomogeneous { row: 1, value: 0.5 });
        assert!(err.is_invalid_input());
    }

    #[test]
    fn rejects_dimension_mismatches() {
        assert_eq!(
            ridge_weights(&[vec![1.0, 2.0]], &[1.0, 2.0], 1.0).unwrap_err(),
            RegressionError::RowTargetMismatch { rows: 1, targets: 2 }
        );
        assert_eq!(
            ridge_weights(&[vec![1.0, 2.0], vec![1.0]], &[1.0, 2.0], 1.0).unwrap_err(),
            RegressionError::DimensionMismatch { expected: 2, got: 1 }
        );
        assert_eq!(ridge_weights(&[], &[], 1.0).unwrap_err(), RegressionError::Empty);

        let m = RidgeRegressor::train(vec![vec![1.0, 2.0, 3.0]], vec![1.0], 1.0).unwrap();
        assert_eq!(
            m.predict(&[1.0]).unwrap_err(),
            RegressionError::DimensionMismatch { expected: 2, got: 1 }
        );
        let mut m = m;
        assert!(m.add_row(vec![1.0, 2.0], 1.0).is_err());
        assert!(m.add_row(vec![2.0, 2.0, 2.0], 1.0).is_err());
    }

    #[test]
    fn rejects_non_finite_training_values() {
        assert_eq!(
            ridge_weights(&[vec![1.0, f64::NAN]], &[1.0], 1.0).unwrap_err(),
            RegressionError::NonFinite { row: 0 }
        );
        assert_eq!(
            ridge_weights(&[vec![1.0, 1.0]], &[f64::INFINITY], 1.0).unwrap_err(),
            RegressionError::NonFinite { row: 0 }
        );
        assert!(matches!(
            ridge_weights(&[vec![1.0, 1.0]], &[1.0], -1.0),
            Err(RegressionError::BadRegularization(_))
        ));
    }
}
