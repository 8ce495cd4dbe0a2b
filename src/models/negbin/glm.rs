//! Negative binomial GLM with log link, fitted by IRLS.
//!
//! The fit starts from a Poisson IRLS solution and then alternates between
//! IRLS at fixed dispersion `theta` and a maximum-likelihood update of
//! `theta` until the log-likelihood and `theta` stop moving. Data without
//! overdispersion drive `theta` to `theta_max`, the Poisson limit.

use super::model::NegBinConfig;
use crate::error::{ForecastError, Result};
use crate::utils::linalg::{dot, wls_fit};
use crate::utils::stats::trigamma;
use statrs::function::gamma::{digamma, ln_gamma};
use tracing::debug;

/// Largest linear predictor accepted before the fit is declared divergent.
const MAX_ETA: f64 = 700.0;
const THETA_ITERATIONS: usize = 100;
const THETA_MIN: f64 = 1e-4;

/// Output of [`fit_glm`].
#[derive(Debug, Clone)]
pub(crate) struct GlmFit {
    pub coefficients: Vec<f64>,
    /// `(X'WX)^-1` at the final working weights.
    pub covariance: Vec<Vec<f64>>,
    pub theta: f64,
    pub log_likelihood: f64,
    pub deviance: f64,
    /// Total IRLS iterations over all stages.
    pub iterations: usize,
    /// Fitted means, one per row.
    pub fitted: Vec<f64>,
}

struct IrlsState {
    coefficients: Vec<f64>,
    covariance: Vec<Vec<f64>>,
    eta: Vec<f64>,
    mu: Vec<f64>,
    deviance: f64,
    iterations: usize,
}

/// Fit `y ~ NB(exp(X beta), theta)` with prior weights.
///
/// Rows with zero prior weight do not influence the fit. Fails with
/// `FitNonconvergent` on singular normal equations, non-finite predictions
/// or when the iteration limit is reached.
pub(crate) fn fit_glm(
    rows: &[Vec<f64>],
    y: &[f64],
    prior_weights: &[f64],
    config: &NegBinConfig,
) -> Result<GlmFit> {
    let n = rows.len();
    let p = rows.first().map(|r| r.len()).unwrap_or(0);
    if n < p || n == 0 {
        return Err(ForecastError::InsufficientData { needed: p.max(1), got: n });
    }
    if y.len() != n || prior_weights.len() != n {
        return Err(ForecastError::DimensionMismatch {
            expected: n,
            got: y.len().min(prior_weights.len()),
        });
    }
    if y.iter().any(|&v| !(v >= 0.0) || !v.is_finite()) {
        return Err(ForecastError::InvalidParameter(
            "counts must be finite and non-negative".to_string(),
        ));
    }
    if dot(y, prior_weights) <= 0.0 {
        return Err(ForecastError::FitNonconvergent(
            "all weighted counts are zero".to_string(),
        ));
    }

    let mut state = irls(rows, y, prior_weights, f64::INFINITY, None, config)?;
    let mut iterations = state.iterations;
    let mut theta = f64::INFINITY;
    let mut ll = log_likelihood(y, &state.mu, prior_weights, theta, config.theta_max);

    for outer in 1..=config.max_iter {
        let next_theta = theta_ml(y, &state.mu, prior_weights, config.theta_max);
        state = irls(rows, y, prior_weights, next_theta, Some(&state.eta), config)?;
        iterations += state.iterations;

        let next_ll = log_likelihood(y, &state.mu, prior_weights, next_theta, config.theta_max);
        let ll_stable = (next_ll - ll).abs() <= config.tolerance * (next_ll.abs() + 1.0);
        let theta_stable = theta.is_finite()
            && (next_theta - theta).abs() <= config.tolerance.sqrt() * theta;
        theta = next_theta;
        ll = next_ll;

        if ll_stable && theta_stable {
            debug!(
                theta,
                log_likelihood = ll,
                deviance = state.deviance,
                outer,
                iterations,
                "negative binomial fit converged"
            );
            return Ok(GlmFit {
                coefficients: state.coefficients,
                covariance: state.covariance,
                theta,
                log_likelihood: ll,
                deviance: state.deviance,
                iterations,
                fitted: state.mu,
            });
        }
    }

    Err(ForecastError::FitNonconvergent(format!(
        "dispersion did not stabilise within {} iterations",
        config.max_iter
    )))
}

/// IRLS at fixed `theta` (`INFINITY` for Poisson). `theta` at the cap is
/// treated as Poisson.
fn irls(
    rows: &[Vec<f64>],
    y: &[f64],
    pw: &[f64],
    theta: f64,
    start: Option<&[f64]>,
    config: &NegBinConfig,
) -> Result<IrlsState> {
    let theta = if theta >= config.theta_max {
        f64::INFINITY
    } else {
        theta
    };
    let mut eta: Vec<f64> = match start {
        Some(eta) => eta.to_vec(),
        None => y.iter().map(|&v| (v + 0.1).ln()).collect(),
    };
    let mut mu: Vec<f64> = eta.iter().map(|e| e.exp()).collect();
    let mut current = deviance(y, &mu, pw, theta);

    for iteration in 1..=config.max_iter {
        let weights: Vec<f64> = mu
            .iter()
            .zip(pw)
            .map(|(&m, &w)| w * m / (1.0 + m / theta))
            .collect();
        let z: Vec<f64> = eta
            .iter()
            .zip(&mu)
            .zip(y)
            .map(|((&e, &m), &v)| e + (v - m) / m)
            .collect();

        let wls = wls_fit(rows, &z, &weights)?;
        eta = rows.iter().map(|r| dot(r, &wls.coefficients)).collect();
        if eta.iter().any(|e| !e.is_finite() || *e > MAX_ETA) {
            return Err(ForecastError::FitNonconvergent(
                "linear predictor diverged".to_string(),
            ));
        }
        mu = eta.iter().map(|e| e.exp()).collect();

        let next = deviance_checked(y, &mu, pw, theta)?;
        let converged = (next - current).abs() / (next.abs() + 0.1) < config.tolerance;
        current = next;
        if converged {
            return Ok(IrlsState {
                coefficients: wls.coefficients,
                covariance: wls.xtwx_inverse,
                eta,
                mu,
                deviance: current,
                iterations: iteration,
            });
        }
    }

    Err(ForecastError::FitNonconvergent(format!(
        "IRLS did not converge within {} iterations",
        config.max_iter
    )))
}

fn deviance_checked(y: &[f64], mu: &[f64], pw: &[f64], theta: f64) -> Result<f64> {
    let d = deviance(y, mu, pw, theta);
    if d.is_finite() {
        Ok(d)
    } else {
        Err(ForecastError::FitNonconvergent("non-finite deviance".to_string()))
    }
}

/// Residual deviance of the NB (or Poisson, for infinite `theta`) model.
pub(crate) fn deviance(y: &[f64], mu: &[f64], pw: &[f64], theta: f64) -> f64 {
    y.iter()
        .zip(mu)
        .zip(pw)
        .map(|((&v, &m), &w)| {
            let y_log = if v > 0.0 { v * (v / m).ln() } else { 0.0 };
            let unit = if theta.is_finite() {
                y_log - (v + theta) * ((v + theta) / (m + theta)).ln()
            } else {
                y_log - (v - m)
            };
            2.0 * w * unit
        })
        .sum()
}

/// Log-likelihood; `theta` at or above `theta_max` uses the Poisson form.
pub(crate) fn log_likelihood(y: &[f64], mu: &[f64], pw: &[f64], theta: f64, theta_max: f64) -> f64 {
    let poisson = !theta.is_finite() || theta >= theta_max;
    y.iter()
        .zip(mu)
        .zip(pw)
        .map(|((&v, &m), &w)| {
            let unit = if poisson {
                v * m.ln() - m - ln_gamma(v + 1.0)
            } else {
                ln_gamma(v + theta) - ln_gamma(theta) - ln_gamma(v + 1.0)
                    + theta * (theta / (theta + m)).ln()
                    + if v > 0.0 { v * (m / (theta + m)).ln() } else { 0.0 }
            };
            w * unit
        })
        .sum()
}

/// Maximum-likelihood `theta` for fixed means, by Newton iteration on the
/// score. Returns `theta_max` when the data are not overdispersed.
pub(crate) fn theta_ml(y: &[f64], mu: &[f64], pw: &[f64], theta_max: f64) -> f64 {
    let total: f64 = pw.iter().sum();
    let pearson: f64 = y
        .iter()
        .zip(mu)
        .zip(pw)
        .map(|((&v, &m), &w)| w * (v / m - 1.0).powi(2))
        .sum();
    let start = total / pearson;
    if !start.is_finite() || start >= theta_max {
        return theta_max;
    }
    let mut theta = start.max(THETA_MIN);

    for _ in 0..THETA_ITERATIONS {
        let (score, info) = theta_score(y, mu, pw, theta);
        if !score.is_finite() || !info.is_finite() {
            break;
        }
        let mut next = if info > 0.0 {
            theta + score / info
        } else if score > 0.0 {
            theta * 2.0
        } else {
            theta / 2.0
        };
        if next <= 0.0 {
            next = theta / 2.0;
        }
        if next >= theta_max {
            return theta_max;
        }
        let step = (next - theta).abs();
        theta = next.max(THETA_MIN);
        if step <= 1e-8 * theta.max(1.0) {
            break;
        }
    }
    theta
}

/// Score and observed information of the NB log-likelihood in `theta`.
fn theta_score(y: &[f64], mu: &[f64], pw: &[f64], theta: f64) -> (f64, f64) {
    let mut score = 0.0;
    let mut info = 0.0;
    for ((&v, &m), &w) in y.iter().zip(mu).zip(pw) {
        if w == 0.0 {
            continue;
        }
        score += w
            * (digamma(theta + v) - digamma(theta) + theta.ln() + 1.0
                - (theta + m).ln()
                - (v + theta) / (m + theta));
        info += w
            * (-trigamma(theta + v) + trigamma(theta) - 1.0 / theta + 2.0 / (m + theta)
                - (v + theta) / (m + theta).powi(2));
    }
    (score, info)
}
