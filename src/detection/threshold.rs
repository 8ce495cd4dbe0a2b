//! Per-period thresholds and evaluation ranges.

use crate::core::{Period, Series};
use crate::error::{ForecastError, Result};

/// Upper bound for one period and whether the observation exceeded it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub period: Period,
    /// `None` when the count is missing; such periods never alarm.
    pub observed: Option<f64>,
    pub upper_bound: f64,
    pub alarm: bool,
    /// Strategy-specific statistic: the expected count for the reweighted
    /// baseline, the likelihood-ratio statistic for the sequential detector.
    pub statistic: f64,
}

/// Inclusive range of periods to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationRange {
    first: Period,
    last: Period,
}

impl EvaluationRange {
    pub fn new(first: Period, last: Period) -> Result<Self> {
        if first.frequency() != last.frequency() {
            return Err(ForecastError::InvalidParameter(format!(
                "range bounds have different frequencies: {first} and {last}"
            )));
        }
        if first > last {
            return Err(ForecastError::InvalidParameter(format!(
                "range start {first} is after its end {last}"
            )));
        }
        Ok(Self { first, last })
    }

    pub fn single(period: Period) -> Self {
        Self {
            first: period,
            last: period,
        }
    }

    /// The last `n` periods of `series` (the whole series if shorter).
    pub fn tail(series: &Series, n: usize) -> Self {
        let n = n.clamp(1, series.len());
        Self {
            first: series.period_at(series.len() - n),
            last: series.end(),
        }
    }

    pub fn first(&self) -> Period {
        self.first
    }

    pub fn last(&self) -> Period {
        self.last
    }

    /// Number of periods covered.
    pub fn period_count(&self) -> usize {
        self.first.distance(&self.last) as usize + 1
    }

    /// Positions of the first and last period within `series`.
    pub fn resolve(&self, series: &Series) -> Result<(usize, usize)> {
        match (series.index_of(self.first), series.index_of(self.last)) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(series.out_of_bounds(self.first, self.last)),
        }
    }
}
