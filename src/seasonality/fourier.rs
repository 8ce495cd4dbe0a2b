//! Fourier seasonal terms.
//!
//! Seasonality with period `P` is modelled by `K` sine/cosine pairs at
//! frequencies `k / P`, `k = 1..=K`. The phase of every term is computed
//! from the absolute ordinal of the period, never from a position within the
//! requested range, so features generated for a fit window and for the
//! forecast horizon that follows it line up without a discontinuity.

use crate::core::{Period, Series};
use crate::error::{ForecastError, Result};
use std::f64::consts::PI;

/// Seasonal features of one period: `[sin_1, cos_1, ..., sin_K, cos_K]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalFeatureSet {
    period: Period,
    values: Vec<f64>,
}

impl SeasonalFeatureSet {
    pub fn period(&self) -> Period {
        self.period
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of harmonics `K`.
    pub fn harmonics(&self) -> usize {
        self.values.len() / 2
    }

    /// Sine term of harmonic `k` (1-based).
    pub fn sin(&self, k: usize) -> Option<f64> {
        k.checked_sub(1).and_then(|i| self.values.get(2 * i)).copied()
    }

    /// Cosine term of harmonic `k` (1-based).
    pub fn cos(&self, k: usize) -> Option<f64> {
        k.checked_sub(1).and_then(|i| self.values.get(2 * i + 1)).copied()
    }
}

/// Harmonic basis: `K` harmonics of a cycle `P` periods long.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FourierBasis {
    harmonics: usize,
    period: f64,
}

impl FourierBasis {
    /// Create a basis with `harmonics` pairs over a cycle of `period`
    /// periods (e.g. 52 or 52.18 for weekly data with yearly seasonality).
    ///
    /// `harmonics` must be at least 1 and below `period / 2`: at `period / 2`
    /// the sine term vanishes at every integer period.
    pub fn new(harmonics: usize, period: f64) -> Result<Self> {
        if !(period.is_finite() && period > 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "periods per cycle must be greater than 1, got {period}"
            )));
        }
        if harmonics == 0 || 2.0 * harmonics as f64 >= period {
            return Err(ForecastError::InvalidParameter(format!(
                "harmonics must be at least 1 and below {}, got {harmonics}",
                period / 2.0
            )));
        }
        Ok(Self { harmonics, period })
    }

    pub fn harmonics(&self) -> usize {
        self.harmonics
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    /// Number of feature columns (`2K`).
    pub fn width(&self) -> usize {
        2 * self.harmonics
    }

    pub fn features_at(&self, period: Period) -> SeasonalFeatureSet {
        let position = period.ordinal() as f64;
        let mut values = Vec::with_capacity(self.width());
        for k in 1..=self.harmonics {
            let angle = 2.0 * PI * k as f64 * position / self.period;
            values.push(angle.sin());
            values.push(angle.cos());
        }
        SeasonalFeatureSet { period, values }
    }

    pub fn features(&self, periods: &[Period]) -> Vec<SeasonalFeatureSet> {
        periods.iter().map(|&p| self.features_at(p)).collect()
    }

    /// Features for every period of a series (the fit range).
    pub fn historical(&self, series: &Series) -> Vec<SeasonalFeatureSet> {
        (0..series.len())
            .map(|i| self.features_at(series.period_at(i)))
            .collect()
    }

    /// Features for the `horizon` periods following `last`.
    pub fn horizon(&self, last: Period, horizon: usize) -> Vec<SeasonalFeatureSet> {
        (1..=horizon)
            .map(|h| self.features_at(last.offset(h as i64)))
            .collect()
    }
}
