//! Ordinary least squares regression

use crate::TrainingError;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Relative ridge added to the standardized normal equations
const BASE_RIDGE: f64 = 1e-8;

/// Linear regression with intercept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    /// Weight per input feature, in original units
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Weights of the standardized problem, used for importances
    standardized: Vec<f64>,
}

impl LinearRegressor {
    /// Fit by solving the standardized normal equations.
    ///
    /// Columns are centered and scaled before solving, and a tiny ridge term
    /// keeps exactly collinear inputs (e.g. a temperature difference next to
    /// both temperatures) solvable.
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>) -> Result<Self, TrainingError> {
        let (n_samples, n_features) = x.dim();
        if n_samples != y.len() {
            return Err(TrainingError::Shape {
                expected: n_samples,
                actual: y.len(),
            });
        }
        if n_samples == 0 {
            return Err(TrainingError::InsufficientSamples {
                required: 1,
                actual: 0,
            });
        }

        let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_features));
        let y_mean = y.mean().unwrap_or(0.0);
        let scale: Array1<f64> = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });

        let z = (x - &x_mean) / &scale;
        let yc = y - y_mean;

        let ztz = z.t().dot(&z);
        let zty = z.t().dot(&yc);

        let mut ridge = BASE_RIDGE * n_samples as f64;
        let weights = loop {
            let mut a = ztz.clone();
            for i in 0..n_features {
                a[[i, i]] += ridge;
            }
            if let Some(w) = cholesky_solve(&a, &zty) {
                break w;
            }
            ridge *= 1e3;
            debug!("Normal equations not positive definite, ridge raised to {:e}", ridge);
            if ridge > n_samples as f64 {
                return Err(TrainingError::SingularSystem);
            }
        };

        let coefficients: Array1<f64> = &weights / &scale;
        let intercept = y_mean - coefficients.dot(&x_mean);

        Ok(Self {
            coefficients: coefficients.to_vec(),
            intercept,
            standardized: weights.to_vec(),
        })
    }

    /// Predict a single row
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(w, v)| w * v)
                .sum::<f64>()
    }

    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    pub fn check_structure(&self) -> Result<(), String> {
        if self.standardized.len() != self.coefficients.len() {
            return Err(format!(
                "{} coefficients but {} standardized weights",
                self.coefficients.len(),
                self.standardized.len()
            ));
        }
        Ok(())
    }

    /// Normalized absolute standardized weights
    pub fn feature_importances(&self) -> Vec<f64> {
        let total: f64 = self.standardized.iter().map(|w| w.abs()).sum();
        if total > 0.0 {
            self.standardized.iter().map(|w| w.abs() / total).collect()
        } else {
            vec![0.0; self.standardized.len()]
        }
    }
}

/// Solve a symmetric positive-definite system with a Cholesky factorization.
///
/// Returns `None` when the matrix is not positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_exact_fit() {
        // y = 2a - 3b + 1
        let x = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [2.0, 3.0], [4.0, 1.0]];
        let y = array![1.0, 3.0, -2.0, -4.0, 6.0];
        let model = LinearRegressor::fit(&x, &y).unwrap();

        assert!((model.coefficients[0] - 2.0).abs() < 1e-4);
        assert!((model.coefficients[1] + 3.0).abs() < 1e-4);
        assert!((model.intercept - 1.0).abs() < 1e-4);
        assert!((model.predict_row(&[1.0, 1.0]) - 0.0).abs() < 1e-4);
    }

    #[test]
    fn test_collinear_columns() {
        // third column is the difference of the first two
        let rows: Vec<[f64; 3]> = (0..20)
            .map(|i| {
                let a = i as f64;
                let b = (i * 7 % 5) as f64;
                [a, b, a - b]
            })
            .collect();
        let x = Array2::from_shape_fn((rows.len(), 3), |(r, c)| rows[r][c]);
        let y: Array1<f64> = rows.iter().map(|r| 0.5 * r[0] + 2.0 * r[1] + 4.0).collect();

        let model = LinearRegressor::fit(&x, &y).unwrap();
        for (row, target) in rows.iter().zip(y.iter()) {
            assert!((model.predict_row(row) - target).abs() < 1e-3);
        }
    }

    #[test]
    fn test_constant_feature() {
        let x = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let y = array![2.0, 4.0, 6.0];
        let model = LinearRegressor::fit(&x, &y).unwrap();

        assert!(model.coefficients[1].abs() < 1e-9);
        assert!((model.predict_row(&[4.0, 5.0]) - 8.0).abs() < 1e-4);
        let importances = model.feature_importances();
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shape_mismatch() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0];
        assert!(matches!(
            LinearRegressor::fit(&x, &y),
            Err(TrainingError::Shape { .. })
        ));
    }
}
