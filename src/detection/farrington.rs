//! Reweighted-baseline aberration detection.
//!
//! For each evaluated period a negative binomial model is fitted to a
//! baseline of earlier periods (comparable periods of previous cycles, or a
//! trailing window). Baseline points that look like past outbreaks are
//! down-weighted using their Anscombe residuals and the model is refitted.
//! The upper bound is the `1 - alpha` quantile of the negative binomial
//! at the expected count for the current period.
//!
//! This follows Farrington et al. (1996) and Noufaily et al. (2013), with the
//! quasi-Poisson dispersion replaced by a maximum-likelihood negative
//! binomial.

use super::threshold::{EvaluationRange, Threshold};
use super::AberrationDetector;
use crate::core::Series;
use crate::error::{ForecastError, Result};
use crate::models::negbin::glm::{fit_glm, GlmFit};
use crate::models::negbin::NegBinConfig;
use crate::utils::linalg::{dot, quadratic_form};
use crate::utils::stats::{nb_quantile, normal_sf};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Periods forming the baseline of an evaluated period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineWindow {
    /// `half_window` periods either side of the same period in each of the
    /// previous `years_back` cycles.
    Seasonal {
        years_back: usize,
        half_window: usize,
    },
    /// The `periods` periods immediately before the evaluated one.
    Trailing { periods: usize },
    /// The first `periods` periods of the series that precede the evaluated one.
    Leading { periods: usize },
}

impl Default for BaselineWindow {
    fn default() -> Self {
        BaselineWindow::Seasonal {
            years_back: 3,
            half_window: 3,
        }
    }
}

/// Suppress alarms unless at least `cases` were counted over the last
/// `periods` periods (current one included).
///
/// A suppressed period reports the observed count as its upper bound, so an
/// alarm is always raised exactly when the count exceeds the bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecentCases {
    pub cases: f64,
    pub periods: usize,
}

/// Controls of the reweighted-baseline detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FarringtonConfig {
    pub baseline: BaselineWindow,
    /// Length of one seasonal cycle in periods.
    pub periods_per_cycle: f64,
    /// Most recent periods left out of the baseline (reporting delay).
    pub past_periods_not_included: usize,
    /// One-sided exceedance probability of the upper bound.
    pub alpha: f64,
    pub reweight: bool,
    /// Anscombe residuals above this value are down-weighted.
    pub reweighting_threshold: f64,
    pub reweighting_iterations: usize,
    /// Try a linear trend when the baseline is long enough.
    pub trend: bool,
    /// Significance level the trend must reach to be kept.
    pub trend_threshold: f64,
    /// Cycles the baseline must span before a trend is tried.
    pub trend_min_cycles: usize,
    /// Fewest observed baseline periods needed for a fit.
    pub min_baseline: usize,
    pub min_recent_cases: Option<RecentCases>,
    pub negbin: NegBinConfig,
}

impl Default for FarringtonConfig {
    fn default() -> Self {
        Self {
            baseline: BaselineWindow::default(),
            periods_per_cycle: 52.0,
            past_periods_not_included: 0,
            alpha: 0.05,
            reweight: true,
            reweighting_threshold: 1.0,
            reweighting_iterations: 1,
            trend: true,
            trend_threshold: 0.05,
            trend_min_cycles: 3,
            min_baseline: 1,
            min_recent_cases: Some(RecentCases {
                cases: 5.0,
                periods: 4,
            }),
            negbin: NegBinConfig::default().with_trend(false),
        }
    }
}

impl FarringtonConfig {
    /// Baseline of the `periods` periods before each evaluated period.
    pub fn trailing(periods: usize) -> Self {
        Self {
            baseline: BaselineWindow::Trailing { periods },
            ..Self::default()
        }
    }

    /// Baseline taken from the first `periods` periods of the series.
    pub fn leading(periods: usize) -> Self {
        Self {
            baseline: BaselineWindow::Leading { periods },
            ..Self::default()
        }
    }

    pub fn seasonal(years_back: usize, half_window: usize) -> Self {
        Self {
            baseline: BaselineWindow::Seasonal {
                years_back,
                half_window,
            },
            ..Self::default()
        }
    }

    pub fn with_periods_per_cycle(mut self, periods: f64) -> Self {
        self.periods_per_cycle = periods;
        self
    }

    pub fn with_past_periods_not_included(mut self, periods: usize) -> Self {
        self.past_periods_not_included = periods;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_reweighting(mut self, reweight: bool) -> Self {
        self.reweight = reweight;
        self
    }

    pub fn with_reweighting_threshold(mut self, threshold: f64) -> Self {
        self.reweighting_threshold = threshold;
        self
    }

    pub fn with_trend(mut self, trend: bool) -> Self {
        self.trend = trend;
        self
    }

    pub fn with_trend_threshold(mut self, threshold: f64) -> Self {
        self.trend_threshold = threshold;
        self
    }

    pub fn with_min_recent_cases(mut self, rule: Option<RecentCases>) -> Self {
        self.min_recent_cases = rule;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ForecastError::InvalidParameter(msg));
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return invalid(format!("alpha must be in (0, 1), got {}", self.alpha));
        }
        if !(self.periods_per_cycle > 1.0 && self.periods_per_cycle.is_finite()) {
            return invalid(format!(
                "periods_per_cycle must be greater than 1, got {}",
                self.periods_per_cycle
            ));
        }
        if !(self.reweighting_threshold > 0.0) {
            return invalid("reweighting_threshold must be positive".to_string());
        }
        if !(self.trend_threshold > 0.0 && self.trend_threshold < 1.0) {
            return invalid(format!(
                "trend_threshold must be in (0, 1), got {}",
                self.trend_threshold
            ));
        }
        if self.min_baseline == 0 {
            return invalid("min_baseline must be positive".to_string());
        }
        let empty = match self.baseline {
            BaselineWindow::Seasonal { years_back, .. } => years_back == 0,
            BaselineWindow::Trailing { periods } | BaselineWindow::Leading { periods } => {
                periods == 0
            }
        };
        if empty {
            return invalid("baseline window is empty".to_string());
        }
        if let Some(rule) = self.min_recent_cases {
            if rule.periods == 0 || rule.cases < 0.0 {
                return invalid("minimum recent cases rule needs a positive window".to_string());
            }
        }
        self.negbin.validate()
    }
}

/// Reweighted-baseline detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Farrington {
    config: FarringtonConfig,
}

struct BaselineFit {
    expected: f64,
    theta: f64,
    trend_p_value: Option<f64>,
}

impl Farrington {
    pub fn new(config: FarringtonConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FarringtonConfig {
        &self.config
    }

    /// Series positions forming the baseline of position `current`.
    pub fn baseline_indices(&self, current: usize) -> Vec<usize> {
        let end = current.saturating_sub(self.config.past_periods_not_included);
        match self.config.baseline {
            BaselineWindow::Trailing { periods } => (end.saturating_sub(periods)..end).collect(),
            BaselineWindow::Leading { periods } => (0..periods.min(end)).collect(),
            BaselineWindow::Seasonal {
                years_back,
                half_window,
            } => {
                let half = half_window as i64;
                let mut indices = BTreeSet::new();
                for year in 1..=years_back {
                    let center =
                        current as i64 - (year as f64 * self.config.periods_per_cycle).round() as i64;
                    for j in (center - half)..=(center + half) {
                        if j >= 0 && (j as usize) < end {
                            indices.insert(j as usize);
                        }
                    }
                }
                indices.into_iter().collect()
            }
        }
    }

    fn threshold_at(&self, series: &Series, current: usize) -> Result<Threshold> {
        let period = series.period_at(current);
        let baseline: Vec<(usize, f64)> = self
            .baseline_indices(current)
            .into_iter()
            .filter_map(|j| series.values()[j].map(|y| (j, y)))
            .collect();
        if baseline.len() < self.config.min_baseline {
            return Err(ForecastError::InsufficientData {
                needed: self.config.min_baseline,
                got: baseline.len(),
            });
        }

        let (expected, mut upper_bound) = if baseline.iter().all(|(_, y)| *y == 0.0) {
            (0.0, 0.0)
        } else {
            let fit = self.fit_with_trend_selection(&baseline, current)?;
            debug!(
                period = %period,
                expected = fit.expected,
                theta = fit.theta,
                trend_p = ?fit.trend_p_value,
                "fitted reweighted baseline"
            );
            (
                fit.expected,
                nb_quantile(1.0 - self.config.alpha, fit.expected, fit.theta),
            )
        };

        let observed = series.values()[current];
        let mut alarm = false;
        if let Some(y) = observed.filter(|&y| y > upper_bound) {
            if self.enough_recent_cases(series, current) {
                alarm = true;
                info!(period = %period, observed = y, upper_bound, "aberration detected");
            } else {
                // too few recent cases: lift the bound so the count does not exceed it
                debug!(period = %period, observed = y, upper_bound, "alarm suppressed by recent cases rule");
                upper_bound = y;
            }
        }

        Ok(Threshold {
            period,
            observed,
            upper_bound,
            alarm,
            statistic: expected,
        })
    }

    fn enough_recent_cases(&self, series: &Series, current: usize) -> bool {
        match self.config.min_recent_cases {
            None => true,
            Some(rule) => {
                let from = (current + 1).saturating_sub(rule.periods);
                let recent: f64 = series.values()[from..=current].iter().flatten().sum();
                recent >= rule.cases
            }
        }
    }

    /// Fit with a trend when the baseline spans enough cycles, keeping it only
    /// if significant and not extrapolating above the baseline maximum.
    fn fit_with_trend_selection(&self, baseline: &[(usize, f64)], current: usize) -> Result<BaselineFit> {
        let (first, last) = match (baseline.first(), baseline.last()) {
            (Some(a), Some(b)) => (a.0, b.0),
            _ => return Err(ForecastError::InsufficientData { needed: 1, got: 0 }),
        };
        let span_cycles = (last - first + 1) as f64 / self.config.periods_per_cycle;
        let try_trend = self.config.trend
            && span_cycles >= self.config.trend_min_cycles as f64
            && baseline.len() > 2;

        if try_trend {
            let max_count = baseline.iter().map(|(_, y)| *y).fold(0.0, f64::max);
            if let Ok(fit) = self.fit_baseline(baseline, current, true) {
                let significant = fit
                    .trend_p_value
                    .is_some_and(|p| p < self.config.trend_threshold);
                if significant && fit.expected <= max_count {
                    return Ok(fit);
                }
            }
        }
        self.fit_baseline(baseline, current, false)
    }

    fn fit_baseline(&self, baseline: &[(usize, f64)], current: usize, trend: bool) -> Result<BaselineFit> {
        // Time is measured relative to the evaluated period, so the
        // intercept is the expected log count now.
        let rows: Vec<Vec<f64>> = baseline
            .iter()
            .map(|&(j, _)| baseline_row(trend, j as f64 - current as f64))
            .collect();
        let y: Vec<f64> = baseline.iter().map(|(_, v)| *v).collect();

        let mut weights = vec![1.0; y.len()];
        let mut glm = fit_glm(&rows, &y, &weights, &self.config.negbin)?;
        if self.config.reweight {
            for _ in 0..self.config.reweighting_iterations {
                weights = anscombe_weights(&rows, &y, &weights, &glm, self.config.reweighting_threshold);
                glm = fit_glm(&rows, &y, &weights, &self.config.negbin)?;
            }
        }

        let current_row = baseline_row(trend, 0.0);
        let trend_p_value = trend.then(|| {
            let se = glm.covariance[1][1].max(0.0).sqrt();
            if se > 0.0 {
                2.0 * normal_sf((glm.coefficients[1] / se).abs())
            } else {
                1.0
            }
        });

        Ok(BaselineFit {
            expected: dot(&current_row, &glm.coefficients).exp(),
            theta: glm.theta,
            trend_p_value,
        })
    }
}

fn baseline_row(trend: bool, time: f64) -> Vec<f64> {
    if trend {
        vec![1.0, time]
    } else {
        vec![1.0]
    }
}

/// Weights `s^-2` for standardized Anscombe residuals `s` above `threshold`,
/// rescaled to sum to the number of observations.
fn anscombe_weights(
    rows: &[Vec<f64>],
    y: &[f64],
    prior: &[f64],
    glm: &GlmFit,
    threshold: f64,
) -> Vec<f64> {
    let raw: Vec<f64> = rows
        .iter()
        .zip(y)
        .zip(prior)
        .zip(&glm.fitted)
        .map(|(((row, &count), &pw), &mu)| {
            let dispersion = 1.0 + mu / glm.theta;
            let hat = pw * mu / dispersion * quadratic_form(&glm.covariance, row);
            let denom = mu.powf(1.0 / 6.0) * (dispersion * (1.0 - hat)).sqrt();
            let s = if denom > 1e-10 && (1.0 - hat) > 1e-10 {
                1.5 * (count.powf(2.0 / 3.0) - mu.powf(2.0 / 3.0)) / denom
            } else {
                0.0
            };
            if s > threshold {
                s.powi(-2)
            } else {
                1.0
            }
        })
        .collect();
    let total: f64 = raw.iter().sum();
    let scale = y.len() as f64 / total;
    raw.into_iter().map(|w| w * scale).collect()
}

impl AberrationDetector for Farrington {
    fn detect(&self, series: &Series, range: EvaluationRange) -> Result<Vec<Threshold>> {
        let (first, last) = range.resolve(series)?;
        (first..=last)
            .map(|current| self.threshold_at(series, current))
            .collect()
    }

    fn name(&self) -> &str {
        "Farrington"
    }
}
