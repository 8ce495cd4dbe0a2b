//! Statistical utility functions.

use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::beta::beta_reg;
use statrs::function::gamma::gamma_ur;

/// Dispersion above which the negative binomial is evaluated as a Poisson.
pub const POISSON_THETA: f64 = 1e5;

/// Quantile function of the standard normal distribution.
///
/// # Example
/// ```
/// use epicast::utils::quantile_normal;
///
/// let z = quantile_normal(0.975);
/// assert!((z - 1.96).abs() < 0.01);
/// ```
pub fn quantile_normal(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.inverse_cdf(p),
        Err(_) => f64::NAN,
    }
}

/// Upper tail probability `P(Z > z)` of the standard normal distribution.
pub fn normal_sf(z: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) => 1.0 - normal.cdf(z),
        Err(_) => f64::NAN,
    }
}

/// Cumulative distribution of a negative binomial with mean `mu` and size
/// (dispersion) `theta`, evaluated at the integer `k`.
///
/// Large `theta` falls back to the Poisson limit.
pub fn nb_cdf(k: u64, mu: f64, theta: f64) -> f64 {
    if mu <= 0.0 {
        return 1.0;
    }
    if !(theta > 0.0) || theta >= POISSON_THETA {
        return gamma_ur(k as f64 + 1.0, mu);
    }
    beta_reg(theta, k as f64 + 1.0, theta / (theta + mu))
}

/// Smallest integer `k` with `P(Y <= k) >= p` for `Y ~ NB(mu, theta)`.
///
/// An infinite mean has an infinite quantile; a NaN mean or probability
/// gives NaN.
pub fn nb_quantile(p: f64, mu: f64, theta: f64) -> f64 {
    if mu.is_nan() || p.is_nan() {
        return f64::NAN;
    }
    if mu <= 0.0 || p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 || mu == f64::INFINITY {
        return f64::INFINITY;
    }

    let variance = if theta.is_finite() { mu + mu * mu / theta } else { mu };
    let mut hi = (mu + 10.0 * variance.sqrt() + 10.0).ceil() as u64;
    let mut guard = 0;
    while nb_cdf(hi, mu, theta) < p {
        hi = hi.saturating_mul(2);
        guard += 1;
        if guard > 60 {
            return f64::INFINITY;
        }
    }

    let mut lo = 0u64;
    if nb_cdf(lo, mu, theta) >= p {
        return 0.0;
    }
    // Invariant: cdf(lo) < p <= cdf(hi)
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if nb_cdf(mid, mu, theta) >= p {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi as f64
}

/// Trigamma function `psi'(x)` for `x > 0`.
///
/// Recurrence up to `x >= 10`, then the asymptotic expansion.
pub fn trigamma(x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc + 1.0 / x
        + x2 / 2.0
        + x2 / x * (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 / 30.0)))
}
