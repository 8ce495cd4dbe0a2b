//! Accuracy metrics for forecast evaluation.

use crate::error::{ForecastError, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Accuracy metric identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    /// Root Mean Squared Error
    Rmse,
    /// Mean Absolute Error
    Mae,
    /// Mean Absolute Percentage Error, in percent
    Mape,
    /// Mean Absolute Scaled Error
    Mase,
    /// Symmetric Mean Absolute Percentage Error, in percent
    Smape,
    /// Mean Error (actual - forecast); positive means under-forecasting
    MeanError,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Rmse,
        Metric::Mae,
        Metric::Mape,
        Metric::Mase,
        Metric::Smape,
        Metric::MeanError,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Rmse => "rmse",
            Metric::Mae => "mae",
            Metric::Mape => "mape",
            Metric::Mase => "mase",
            Metric::Smape => "smape",
            Metric::MeanError => "me",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metric values computed over a set of (actual, forecast) pairs.
///
/// A metric is absent when it is undefined for the data (no eligible pairs,
/// zero MASE scale); the number of pairs left out of each metric is
/// reported in [`AccuracyReport::excluded`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccuracyReport {
    values: BTreeMap<Metric, f64>,
    excluded: BTreeMap<Metric, usize>,
    n_pairs: usize,
    non_finite: usize,
}

impl AccuracyReport {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }

    pub fn rmse(&self) -> Option<f64> {
        self.get(Metric::Rmse)
    }

    pub fn mae(&self) -> Option<f64> {
        self.get(Metric::Mae)
    }

    pub fn mape(&self) -> Option<f64> {
        self.get(Metric::Mape)
    }

    pub fn mase(&self) -> Option<f64> {
        self.get(Metric::Mase)
    }

    /// Pairs left out of a metric's average (non-finite pairs included).
    pub fn excluded(&self, metric: Metric) -> usize {
        self.excluded.get(&metric).copied().unwrap_or(0)
    }

    /// Number of pairs handed to the evaluator.
    pub fn n_pairs(&self) -> usize {
        self.n_pairs
    }

    /// Pairs dropped from every metric because a value was NaN or infinite.
    pub fn non_finite(&self) -> usize {
        self.non_finite
    }

    /// Metric values keyed by their short names.
    pub fn as_map(&self) -> BTreeMap<&'static str, f64> {
        self.values.iter().map(|(m, v)| (m.name(), *v)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Computes accuracy metrics over collected forecast pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccuracyEvaluator {
    /// Lag of the naive benchmark used to scale MASE (1 = naive, m = seasonal naive).
    pub seasonal_lag: usize,
}

impl Default for AccuracyEvaluator {
    fn default() -> Self {
        Self { seasonal_lag: 1 }
    }
}

impl AccuracyEvaluator {
    pub fn new(seasonal_lag: usize) -> Self {
        Self {
            seasonal_lag: seasonal_lag.max(1),
        }
    }

    /// Evaluate forecasts against actuals.
    ///
    /// `in_sample` is the history used to scale MASE: the mean absolute
    /// difference between values `seasonal_lag` apart. Mark missing history
    /// with NaN; differences touching it are skipped.
    pub fn evaluate(
        &self,
        actual: &[f64],
        forecast: &[f64],
        in_sample: &[f64],
    ) -> Result<AccuracyReport> {
        if actual.len() != forecast.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: actual.len(),
                got: forecast.len(),
            });
        }

        let pairs: Vec<(f64, f64)> = actual
            .iter()
            .zip(forecast)
            .filter(|(a, f)| a.is_finite() && f.is_finite())
            .map(|(a, f)| (*a, *f))
            .collect();
        let non_finite = actual.len() - pairs.len();

        let mut report = AccuracyReport {
            n_pairs: actual.len(),
            non_finite,
            ..Default::default()
        };
        for metric in Metric::ALL {
            report.excluded.insert(metric, non_finite);
        }
        if pairs.is_empty() {
            return Ok(report);
        }

        let n = pairs.len() as f64;
        let mae = pairs.iter().map(|(a, f)| (a - f).abs()).sum::<f64>() / n;
        let mse = pairs.iter().map(|(a, f)| (a - f).powi(2)).sum::<f64>() / n;
        let me = pairs.iter().map(|(a, f)| a - f).sum::<f64>() / n;
        report.values.insert(Metric::Mae, mae);
        report.values.insert(Metric::Rmse, mse.sqrt());
        report.values.insert(Metric::MeanError, me);

        let smape = pairs
            .iter()
            .map(|(a, f)| {
                let denom = a.abs() + f.abs();
                if denom == 0.0 {
                    0.0
                } else {
                    2.0 * (a - f).abs() / denom
                }
            })
            .sum::<f64>()
            * 100.0
            / n;
        report.values.insert(Metric::Smape, smape);

        let nonzero: Vec<&(f64, f64)> = pairs.iter().filter(|(a, _)| *a != 0.0).collect();
        report
            .excluded
            .insert(Metric::Mape, non_finite + pairs.len() - nonzero.len());
        if !nonzero.is_empty() {
            let mape = 100.0
                * nonzero.iter().map(|(a, f)| ((a - f) / a).abs()).sum::<f64>()
                / nonzero.len() as f64;
            report.values.insert(Metric::Mape, mape);
        }

        match naive_scale(in_sample, self.seasonal_lag) {
            Some(scale) => {
                report.values.insert(Metric::Mase, mae / scale);
            }
            None => {
                report.excluded.insert(Metric::Mase, actual.len());
            }
        }

        Ok(report)
    }
}

/// In-sample mean absolute error of the lag-`m` naive forecast; `None` when
/// it is zero or cannot be computed.
fn naive_scale(in_sample: &[f64], lag: usize) -> Option<f64> {
    if in_sample.len() <= lag {
        return None;
    }
    let diffs: Vec<f64> = in_sample
        .iter()
        .skip(lag)
        .zip(in_sample)
        .map(|(curr, prev)| (curr - prev).abs())
        .filter(|d| d.is_finite())
        .collect();
    if diffs.is_empty() {
        return None;
    }
    let scale = diffs.iter().sum::<f64>() / diffs.len() as f64;
    (scale > 0.0).then_some(scale)
}
