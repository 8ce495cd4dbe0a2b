//! Forecast result structure for holding predictions.

use crate::core::Period;

/// Forecast for a single target period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPoint {
    pub period: Period,
    /// Point estimate of the expected count.
    pub mean: f64,
    /// Confidence interval of the expected count (parameter uncertainty only).
    pub mean_lower: f64,
    pub mean_upper: f64,
    /// Prediction interval for the observed count.
    pub lower: f64,
    pub upper: f64,
}

/// Point forecasts with prediction intervals at one confidence level.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResult {
    level: f64,
    points: Vec<ForecastPoint>,
}

impl ForecastResult {
    pub fn new(level: f64, points: Vec<ForecastPoint>) -> Self {
        Self { level, points }
    }

    /// Confidence level of the intervals, e.g. 0.95.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Number of forecast periods.
    pub fn horizon(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[ForecastPoint] {
        &self.points
    }

    pub fn get(&self, period: Period) -> Option<&ForecastPoint> {
        self.points.iter().find(|p| p.period == period)
    }

    pub fn periods(&self) -> Vec<Period> {
        self.points.iter().map(|p| p.period).collect()
    }

    pub fn means(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.mean).collect()
    }

    pub fn lower(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.lower).collect()
    }

    pub fn upper(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.upper).collect()
    }
}
