//! Sequential likelihood-ratio aberration detection.
//!
//! An in-control negative binomial model is fitted on a phase-one baseline.
//! Each evaluated count is then compared against an out-of-control
//! alternative whose mean is the in-control mean inflated by `exp(kappa)`.
//! With an estimated `kappa` the statistic is the generalized likelihood
//! ratio (GLR) maximised over change points since the last alarm; with a
//! fixed `kappa` it is the classical CUSUM recursion.

use super::threshold::{EvaluationRange, Threshold};
use super::AberrationDetector;
use crate::core::Series;
use crate::error::{ForecastError, Result};
use crate::models::negbin::glm::fit_glm;
use crate::models::negbin::{Design, DesignBuilder, NegBinConfig};
use crate::seasonality::FourierBasis;
use crate::utils::linalg::dot;
use crate::utils::stats::POISSON_THETA;
use tracing::{debug, info};

const KAPPA_ITERATIONS: usize = 100;
const BOUND_ITERATIONS: usize = 60;
const BISECTION_ITERATIONS: usize = 200;

/// Periods used to fit the in-control model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOne {
    /// The first `n` periods of the series.
    Leading(usize),
    /// The `n` periods before the evaluation range, or all of them.
    Preceding(Option<usize>),
}

impl Default for PhaseOne {
    fn default() -> Self {
        PhaseOne::Preceding(None)
    }
}

/// Controls of the sequential detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlrConfig {
    pub phase_one: PhaseOne,
    /// Harmonics of the in-control model; zero for a constant mean.
    pub harmonics: usize,
    pub periods_per_cycle: f64,
    pub trend: bool,
    /// Alarm once the statistic reaches this value.
    pub control_limit: f64,
    /// Fixed log mean shift (CUSUM). `None` estimates it (GLR).
    pub kappa: Option<f64>,
    /// Longest window searched for a change point.
    pub max_window: Option<usize>,
    /// Refit the in-control model on non-alarming counts after each alarm.
    pub refit_after_alarm: bool,
    pub negbin: NegBinConfig,
}

impl Default for GlrConfig {
    fn default() -> Self {
        Self {
            phase_one: PhaseOne::default(),
            harmonics: 0,
            periods_per_cycle: 52.0,
            trend: false,
            control_limit: 5.0,
            kappa: None,
            max_window: Some(52),
            refit_after_alarm: false,
            negbin: NegBinConfig::default(),
        }
    }
}

impl GlrConfig {
    pub fn leading(periods: usize) -> Self {
        Self {
            phase_one: PhaseOne::Leading(periods),
            ..Self::default()
        }
    }

    pub fn preceding(periods: Option<usize>) -> Self {
        Self {
            phase_one: PhaseOne::Preceding(periods),
            ..Self::default()
        }
    }

    pub fn with_harmonics(mut self, harmonics: usize, periods_per_cycle: f64) -> Self {
        self.harmonics = harmonics;
        self.periods_per_cycle = periods_per_cycle;
        self
    }

    pub fn with_trend(mut self, trend: bool) -> Self {
        self.trend = trend;
        self
    }

    pub fn with_control_limit(mut self, limit: f64) -> Self {
        self.control_limit = limit;
        self
    }

    /// Use a CUSUM with the given fixed log shift instead of the GLR.
    pub fn with_kappa(mut self, kappa: Option<f64>) -> Self {
        self.kappa = kappa;
        self
    }

    pub fn with_max_window(mut self, window: Option<usize>) -> Self {
        self.max_window = window;
        self
    }

    pub fn with_refit_after_alarm(mut self, refit: bool) -> Self {
        self.refit_after_alarm = refit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.control_limit > 0.0 && self.control_limit.is_finite()) {
            return Err(ForecastError::InvalidParameter(format!(
                "control_limit must be positive, got {}",
                self.control_limit
            )));
        }
        if let Some(kappa) = self.kappa {
            if !(kappa > 0.0 && kappa.is_finite()) {
                return Err(ForecastError::InvalidParameter(format!(
                    "kappa must be positive, got {kappa}"
                )));
            }
        }
        if self.max_window == Some(0) {
            return Err(ForecastError::InvalidParameter(
                "max_window must be positive".to_string(),
            ));
        }
        if matches!(
            self.phase_one,
            PhaseOne::Leading(0) | PhaseOne::Preceding(Some(0))
        ) {
            return Err(ForecastError::InvalidParameter(
                "phase-one baseline is empty".to_string(),
            ));
        }
        if self.harmonics > 0 {
            FourierBasis::new(self.harmonics, self.periods_per_cycle)?;
        }
        self.negbin.validate()
    }
}

/// Sequential GLR / CUSUM detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glr {
    config: GlrConfig,
}

/// In-control mean model.
struct InControl {
    design: Design,
    basis: Option<FourierBasis>,
    coefficients: Vec<f64>,
    theta: f64,
}

impl InControl {
    fn mean_at(&self, series: &Series, index: usize) -> Result<f64> {
        let period = series.period_at(index);
        let seasonal = self
            .basis
            .map(|b| b.features_at(period).values().to_vec())
            .unwrap_or_default();
        let row = self.design.row(period, index as f64, &seasonal, None)?;
        Ok(dot(&row, &self.coefficients).exp())
    }
}

/// Observed count and its in-control mean.
#[derive(Debug, Clone, Copy)]
struct Observation {
    count: f64,
    mean: f64,
}

impl Glr {
    pub fn new(config: GlrConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GlrConfig {
        &self.config
    }

    fn phase_one_indices(&self, series: &Series, first: usize) -> Vec<usize> {
        match self.config.phase_one {
            PhaseOne::Leading(n) => (0..n.min(series.len())).collect(),
            PhaseOne::Preceding(None) => (0..first).collect(),
            PhaseOne::Preceding(Some(n)) => (first.saturating_sub(n)..first).collect(),
        }
    }

    fn fit_in_control(&self, series: &Series, indices: &[usize]) -> Result<InControl> {
        let basis = if self.config.harmonics > 0 {
            Some(FourierBasis::new(self.config.harmonics, self.config.periods_per_cycle)?)
        } else {
            None
        };
        let design = DesignBuilder::new()
            .with_trend(self.config.trend)
            .with_harmonics(self.config.harmonics)
            .build();

        let mut rows = Vec::with_capacity(indices.len());
        let mut y = Vec::with_capacity(indices.len());
        for &i in indices {
            if let Some(count) = series.values()[i] {
                let period = series.period_at(i);
                let seasonal = basis
                    .map(|b| b.features_at(period).values().to_vec())
                    .unwrap_or_default();
                rows.push(design.row(period, i as f64, &seasonal, None)?);
                y.push(count);
            }
        }
        if rows.len() < design.width() {
            return Err(ForecastError::InsufficientData {
                needed: design.width(),
                got: rows.len(),
            });
        }

        let weights = vec![1.0; y.len()];
        let fit = fit_glm(&rows, &y, &weights, &self.config.negbin)?;
        debug!(
            baseline = y.len(),
            theta = fit.theta,
            iterations = fit.iterations,
            "fitted in-control model"
        );
        Ok(InControl {
            design,
            basis,
            coefficients: fit.coefficients,
            theta: fit.theta,
        })
    }

    /// GLR statistic over every change point in `window`, with the newest
    /// observation replaced by `current`.
    fn glr_statistic(window: &[Option<Observation>], current: Option<Observation>, theta: f64) -> f64 {
        let mut suffix: Vec<Observation> = current.into_iter().collect();
        let mut best = 0.0_f64;
        if !suffix.is_empty() {
            best = max_shift(&suffix, theta).1;
        }
        for obs in window.iter().rev().flatten() {
            suffix.push(*obs);
            best = best.max(max_shift(&suffix, theta).1);
        }
        best
    }

    /// Largest count at the current period whose GLR statistic stays below
    /// `limit`. The statistic is non-decreasing in the count, so every count
    /// above the returned value reaches the limit.
    fn glr_bound(window: &[Option<Observation>], mean: f64, theta: f64, limit: f64) -> f64 {
        let statistic = |count: f64| {
            Self::glr_statistic(window, Some(Observation { count, mean }), theta)
        };
        if statistic(0.0) >= limit {
            return 0.0;
        }
        let mut lo = 0.0;
        let mut hi = mean.max(1.0);
        let mut doublings = 0;
        while statistic(hi) < limit {
            lo = hi;
            hi *= 2.0;
            doublings += 1;
            if doublings > BOUND_ITERATIONS {
                return f64::INFINITY;
            }
        }
        // Invariant: statistic(lo) < limit <= statistic(hi)
        for _ in 0..BISECTION_ITERATIONS {
            let mid = lo + 0.5 * (hi - lo);
            if mid <= lo || mid >= hi {
                break;
            }
            if statistic(mid) < limit {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn run(&self, series: &Series, first: usize, last: usize) -> Result<Vec<Threshold>> {
        let limit = self.config.control_limit;
        let baseline = self.phase_one_indices(series, first);
        let mut model = self.fit_in_control(series, &baseline)?;
        let refit_from = baseline.first().copied().unwrap_or(first);

        let mut thresholds = Vec::with_capacity(last - first + 1);
        let mut window: Vec<Option<Observation>> = Vec::new();
        let mut cusum = 0.0;
        let mut alarmed = Vec::new();

        for n in first..=last {
            let period = series.period_at(n);
            let mean = model.mean_at(series, n)?;
            let observed = series.values()[n];
            let current = observed.map(|count| Observation { count, mean });

            if let Some(max_window) = self.config.max_window {
                let keep = max_window - 1;
                if window.len() > keep {
                    window.drain(..window.len() - keep);
                }
            }

            let (statistic, upper_bound) = match self.config.kappa {
                None => (
                    Self::glr_statistic(&window, current, model.theta),
                    Self::glr_bound(&window, mean, model.theta, limit),
                ),
                Some(kappa) => {
                    let next = current
                        .map(|obs| (cusum + log_ratio(obs, kappa, model.theta)).max(0.0))
                        .unwrap_or(cusum);
                    (next, cusum_bound(cusum, mean, kappa, model.theta, limit))
                }
            };
            if self.config.kappa.is_some() {
                cusum = statistic;
            }

            let alarm = observed.is_some_and(|count| count > upper_bound);
            thresholds.push(Threshold {
                period,
                observed,
                upper_bound,
                alarm,
                statistic,
            });

            if alarm {
                info!(period = %period, observed = ?observed, upper_bound, statistic, "aberration detected");
                alarmed.push(n);
                window.clear();
                cusum = 0.0;
                if self.config.refit_after_alarm {
                    let indices: Vec<usize> = (refit_from..=n).filter(|i| !alarmed.contains(i)).collect();
                    model = self.fit_in_control(series, &indices)?;
                }
            } else {
                window.push(current);
            }
        }
        Ok(thresholds)
    }
}

/// Log-likelihood ratio of `obs` under a mean shifted by `exp(kappa)`.
fn log_ratio(obs: Observation, kappa: f64, theta: f64) -> f64 {
    let Observation { count, mean } = obs;
    if theta >= POISSON_THETA {
        count * kappa - mean * kappa.exp_m1()
    } else {
        count * kappa - (count + theta) * (mean * kappa.exp_m1() / (theta + mean)).ln_1p()
    }
}

/// Sum of log-likelihood ratios and its first two derivatives in `kappa`.
fn shift_score(observations: &[Observation], kappa: f64, theta: f64) -> (f64, f64, f64) {
    let poisson = theta >= POISSON_THETA;
    observations.iter().fold((0.0, 0.0, 0.0), |(l, d1, d2), &obs| {
        let shifted = obs.mean * kappa.exp();
        if poisson {
            (l + log_ratio(obs, kappa, theta), d1 + obs.count - shifted, d2 - shifted)
        } else {
            let denom = theta + shifted;
            (
                l + log_ratio(obs, kappa, theta),
                d1 + obs.count - (obs.count + theta) * shifted / denom,
                d2 - (obs.count + theta) * shifted * theta / (denom * denom),
            )
        }
    })
}

/// Maximum likelihood shift `kappa >= 0` and the attained log-likelihood
/// ratio. The ratio is concave in `kappa`.
fn max_shift(observations: &[Observation], theta: f64) -> (f64, f64) {
    if shift_score(observations, 0.0, theta).1 <= 0.0 {
        return (0.0, 0.0);
    }
    if theta >= POISSON_THETA {
        let counts: f64 = observations.iter().map(|o| o.count).sum();
        let means: f64 = observations.iter().map(|o| o.mean).sum();
        let kappa = (counts / means).ln();
        return (kappa, shift_score(observations, kappa, theta).0);
    }

    let mut lo = 0.0;
    let mut hi = 1.0;
    while shift_score(observations, hi, theta).1 > 0.0 && hi < 700.0 {
        lo = hi;
        hi *= 2.0;
    }
    let mut kappa = 0.5 * (lo + hi);
    for _ in 0..KAPPA_ITERATIONS {
        let (_, d1, d2) = shift_score(observations, kappa, theta);
        if d1.abs() < 1e-10 || hi - lo < 1e-12 {
            break;
        }
        if d1 > 0.0 {
            lo = kappa;
        } else {
            hi = kappa;
        }
        let newton = kappa - d1 / d2;
        kappa = if d2 < 0.0 && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
    }
    (kappa, shift_score(observations, kappa, theta).0)
}

/// Largest count keeping the CUSUM below `limit`, given the previous sum.
///
/// The log-likelihood ratio is linear in the count, so the sum reaches the
/// limit exactly at `root`; the bound is the float just below it.
fn cusum_bound(previous: f64, mean: f64, kappa: f64, theta: f64, limit: f64) -> f64 {
    let root = if theta >= POISSON_THETA {
        (limit - previous + mean * kappa.exp_m1()) / kappa
    } else {
        let log_ratio = (mean * kappa.exp_m1() / (theta + mean)).ln_1p();
        (limit - previous + theta * log_ratio) / (kappa - log_ratio)
    };
    if root > 0.0 && root.is_finite() {
        f64::from_bits(root.to_bits() - 1)
    } else {
        root.max(0.0)
    }
}

impl AberrationDetector for Glr {
    fn detect(&self, series: &Series, range: EvaluationRange) -> Result<Vec<Threshold>> {
        let (first, last) = range.resolve(series)?;
        self.run(series, first, last)
    }

    fn name(&self) -> &str {
        if self.config.kappa.is_some() {
            "CUSUM"
        } else {
            "GLR"
        }
    }
}
