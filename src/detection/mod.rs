//! Aberration detection for count series.
//!
//! Every detector produces one [`Threshold`] per period of an
//! [`EvaluationRange`]: an upper bound and whether the observed count
//! exceeded it. Two strategies are available:
//! - [`Farrington`]: a negative binomial fit on a reweighted historical
//!   baseline per period
//! - [`Glr`]: a sequential likelihood-ratio (GLR or CUSUM) statistic against
//!   an in-control model

mod farrington;
mod glr;
mod threshold;

pub use farrington::{BaselineWindow, Farrington, FarringtonConfig, RecentCases};
pub use glr::{Glr, GlrConfig, PhaseOne};
pub use threshold::{EvaluationRange, Threshold};

use crate::core::Series;
use crate::error::Result;

/// Computes per-period upper bounds and alarms over a range of a series.
pub trait AberrationDetector: Send + Sync {
    /// Evaluate every period in `range`. Fails with `RangeOutOfBounds` when
    /// the range leaves the extent of `series`.
    fn detect(&self, series: &Series, range: EvaluationRange) -> Result<Vec<Threshold>>;

    fn name(&self) -> &str;
}

/// Detector selected by configuration.
///
/// # Example
/// ```
/// use epicast::core::{Frequency, Period, Series};
/// use epicast::detection::{AberrationDetector, DetectorStrategy, EvaluationRange, FarringtonConfig};
///
/// let start = Period::from_ordinal(Frequency::Weekly, 2800);
/// let series = Series::from_values(start, &[10.0, 12.0, 11.0, 13.0, 50.0]).unwrap();
/// let detector = DetectorStrategy::Reweighted(FarringtonConfig::leading(4));
/// let thresholds = detector
///     .detect(&series, EvaluationRange::single(series.end()))
///     .unwrap();
/// assert!(thresholds[0].alarm);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectorStrategy {
    Reweighted(FarringtonConfig),
    SequentialLikelihood(GlrConfig),
}

impl Default for DetectorStrategy {
    fn default() -> Self {
        DetectorStrategy::Reweighted(FarringtonConfig::default())
    }
}

impl DetectorStrategy {
    pub fn validate(&self) -> Result<()> {
        match self {
            DetectorStrategy::Reweighted(config) => config.validate(),
            DetectorStrategy::SequentialLikelihood(config) => config.validate(),
        }
    }
}

impl AberrationDetector for DetectorStrategy {
    fn detect(&self, series: &Series, range: EvaluationRange) -> Result<Vec<Threshold>> {
        match self {
            DetectorStrategy::Reweighted(config) => Farrington::new(*config)?.detect(series, range),
            DetectorStrategy::SequentialLikelihood(config) => Glr::new(*config)?.detect(series, range),
        }
    }

    fn name(&self) -> &str {
        match self {
            DetectorStrategy::Reweighted(_) => "Farrington",
            DetectorStrategy::SequentialLikelihood(config) if config.kappa.is_some() => "CUSUM",
            DetectorStrategy::SequentialLikelihood(_) => "GLR",
        }
    }
}
