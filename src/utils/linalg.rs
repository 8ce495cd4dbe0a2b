//! Weighted least squares and small dense symmetric solvers.
//!
//! The regression models in this crate have a handful of terms, so the
//! normal equations are assembled explicitly and solved with a Cholesky
//! decomposition.

use crate::error::{ForecastError, Result};

/// Relative pivot size below which a matrix is treated as singular.
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Weighted least squares solution.
#[derive(Debug, Clone)]
pub struct WlsResult {
    /// Coefficients, one per design column.
    pub coefficients: Vec<f64>,
    /// `(X'WX)^-1`, the unscaled coefficient covariance.
    pub xtwx_inverse: Vec<Vec<f64>>,
}

/// Fit `z ~ X` by weighted least squares.
///
/// `rows` holds one design row per observation; all rows must have the same
/// width. Fails with `FitNonconvergent` when the weighted normal equations
/// are singular (rank-deficient design).
pub fn wls_fit(rows: &[Vec<f64>], z: &[f64], weights: &[f64]) -> Result<WlsResult> {
    let n = rows.len();
    if n == 0 {
        return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
    }
    if z.len() != n {
        return Err(ForecastError::DimensionMismatch {
            expected: n,
            got: z.len(),
        });
    }
    if weights.len() != n {
        return Err(ForecastError::DimensionMismatch {
            expected: n,
            got: weights.len(),
        });
    }

    let p = rows[0].len();
    let mut xtwx = vec![vec![0.0; p]; p];
    let mut xtwz = vec![0.0; p];

    for ((row, &zi), &wi) in rows.iter().zip(z).zip(weights) {
        if row.len() != p {
            return Err(ForecastError::DimensionMismatch {
                expected: p,
                got: row.len(),
            });
        }
        for i in 0..p {
            let wxi = wi * row[i];
            xtwz[i] += wxi * zi;
            for j in 0..=i {
                xtwx[i][j] += wxi * row[j];
            }
        }
    }
    for i in 0..p {
        for j in 0..i {
            xtwx[j][i] = xtwx[i][j];
        }
    }

    let l = cholesky(&xtwx).ok_or_else(|| {
        ForecastError::FitNonconvergent("design matrix is rank deficient".to_string())
    })?;
    let coefficients = cholesky_solve(&l, &xtwz);
    let xtwx_inverse = cholesky_inverse(&l);

    Ok(WlsResult {
        coefficients,
        xtwx_inverse,
    })
}

/// Quadratic form `x' A x`.
pub fn quadratic_form(a: &[Vec<f64>], x: &[f64]) -> f64 {
    a.iter()
        .zip(x)
        .map(|(row, xi)| xi * row.iter().zip(x).map(|(aij, xj)| aij * xj).sum::<f64>())
        .sum()
}

/// Dot product of two equally long slices.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cholesky decomposition `A = L L'` of a symmetric positive definite matrix.
///
/// Returns `None` when a pivot collapses relative to its diagonal entry.
fn cholesky(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }

            if i == j {
                if !sum.is_finite() || sum <= PIVOT_TOLERANCE * a[i][i].abs() || sum <= 0.0 {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    Some(l)
}

/// Solve `L L' x = b` by forward then backward substitution.
fn cholesky_solve(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();

    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i][j] * y[j];
        }
        y[i] = sum / l[i][i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j][i] * x[j];
        }
        x[i] = sum / l[i][i];
    }

    x
}

fn cholesky_inverse(l: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = l.len();
    let mut inverse = vec![vec![0.0; n]; n];
    for col in 0..n {
        let mut e = vec![0.0; n];
        e[col] = 1.0;
        let x = cholesky_solve(l, &e);
        for row in 0..n {
            inverse[row][col] = x[row];
        }
    }
    inverse
}
