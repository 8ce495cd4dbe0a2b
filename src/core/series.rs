//! Dense count series indexed by calendar periods.

use crate::core::{Frequency, Period};
use crate::error::{ForecastError, Result};

/// An ordered, gap-free sequence of per-period values.
///
/// The series stores its first period and one value per consecutive period,
/// so every period between [`Series::start`] and [`Series::end`] appears
/// exactly once. `None` marks a value that is missing (never reported, or
/// explicitly nulled).
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    start: Period,
    values: Vec<Option<f64>>,
}

impl Series {
    /// Create a series from its first period and consecutive values.
    ///
    /// Non-finite values are treated as missing.
    pub fn new(start: Period, values: Vec<Option<f64>>) -> Result<Self> {
        if values.is_empty() {
            return Err(ForecastError::EmptyData);
        }
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        Ok(Self { start, values })
    }

    /// Create a fully observed series.
    pub fn from_values(start: Period, values: &[f64]) -> Result<Self> {
        Self::new(start, values.iter().map(|&v| Some(v)).collect())
    }

    /// Create a series from `(period, value)` pairs.
    ///
    /// Periods must share a frequency, be strictly increasing and contiguous.
    pub fn from_pairs(pairs: Vec<(Period, Option<f64>)>) -> Result<Self> {
        let start = pairs.first().map(|(p, _)| *p).ok_or(ForecastError::EmptyData)?;
        for (i, (period, _)) in pairs.iter().enumerate() {
            if period.frequency() != start.frequency() {
                return Err(ForecastError::InvalidParameter(format!(
                    "mixed frequencies: {:?} and {:?}",
                    start.frequency(),
                    period.frequency()
                )));
            }
            if *period != start.offset(i as i64) {
                return Err(ForecastError::InvalidParameter(format!(
                    "periods must be strictly increasing without gaps; found {} at position {}",
                    period, i
                )));
            }
        }
        Self::new(start, pairs.into_iter().map(|(_, v)| v).collect())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn frequency(&self) -> Frequency {
        self.start.frequency()
    }

    /// First period of the series.
    pub fn start(&self) -> Period {
        self.start
    }

    /// Last period of the series.
    pub fn end(&self) -> Period {
        self.start.offset(self.values.len() as i64 - 1)
    }

    /// Period at a positional index.
    pub fn period_at(&self, index: usize) -> Period {
        self.start.offset(index as i64)
    }

    /// Positional index of a period, if it lies within the series.
    pub fn index_of(&self, period: Period) -> Option<usize> {
        if period.frequency() != self.frequency() {
            return None;
        }
        let offset = self.start.distance(&period);
        if offset < 0 || offset as usize >= self.values.len() {
            None
        } else {
            Some(offset as usize)
        }
    }

    pub fn contains(&self, period: Period) -> bool {
        self.index_of(period).is_some()
    }

    /// Value at a period; `None` when missing or outside the series.
    pub fn value(&self, period: Period) -> Option<f64> {
        self.index_of(period).and_then(|i| self.values[i])
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// All periods of the series in order.
    pub fn periods(&self) -> Vec<Period> {
        (0..self.len()).map(|i| self.period_at(i)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Period, Option<f64>)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(i, v)| (self.period_at(i), *v))
    }

    /// Observed values only, in order.
    pub fn observed(&self) -> Vec<f64> {
        self.values.iter().filter_map(|v| *v).collect()
    }

    /// Number of observed (non-missing) values.
    pub fn observed_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Periods whose value is missing.
    pub fn missing_periods(&self) -> Vec<Period> {
        self.iter()
            .filter(|(_, v)| v.is_none())
            .map(|(p, _)| p)
            .collect()
    }

    /// True when no value is missing.
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(|v| v.is_some())
    }

    /// Sub-series over positional indices `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Result<Series> {
        if start >= end {
            return Err(ForecastError::InvalidParameter(format!(
                "slice start ({start}) must be below end ({end})"
            )));
        }
        if end > self.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: self.len(),
                got: end,
            });
        }
        Ok(Series {
            start: self.period_at(start),
            values: self.values[start..end].to_vec(),
        })
    }

    /// The first `n` periods.
    pub fn head(&self, n: usize) -> Result<Series> {
        self.slice(0, n)
    }

    /// Sub-series covering `first..=last`.
    pub fn between(&self, first: Period, last: Period) -> Result<Series> {
        match (self.index_of(first), self.index_of(last)) {
            (Some(a), Some(b)) if a <= b => self.slice(a, b + 1),
            _ => Err(self.out_of_bounds(first, last)),
        }
    }

    /// Copy with the listed periods explicitly marked missing, e.g. periods
    /// affected by known reporting anomalies.
    pub fn masked(&self, periods: &[Period]) -> Result<Series> {
        let mut values = self.values.clone();
        for &period in periods {
            let index = self
                .index_of(period)
                .ok_or_else(|| self.out_of_bounds(period, period))?;
            values[index] = None;
        }
        Ok(Series {
            start: self.start,
            values,
        })
    }

    pub(crate) fn out_of_bounds(&self, first: Period, last: Period) -> ForecastError {
        ForecastError::RangeOutOfBounds {
            first,
            last,
            extent_first: self.start(),
            extent_last: self.end(),
        }
    }
}
