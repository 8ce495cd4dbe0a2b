//! # epicast
//!
//! Forecasting and outbreak detection for epidemiological count series.
//!
//! Raw date-stamped counts are aligned on a weekly, daily or monthly period
//! grid, gaps are interpolated, and a negative binomial regression with
//! Fourier seasonal terms is evaluated by rolling-origin backtesting before
//! forecasting the periods ahead. Independently, aberration detectors flag
//! counts that exceed an upper bound derived from historical baselines.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]

pub mod backtest;
pub mod core;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod seasonality;
pub mod transform;
pub mod utils;

pub use error::{ForecastError, Result};

pub mod prelude {
    pub use crate::backtest::{BacktestConfig, BacktestReport, Backtester, WindowStrategy};
    pub use crate::core::{ForecastPoint, ForecastResult, Frequency, Period, Series};
    pub use crate::detection::{
        AberrationDetector, DetectorStrategy, EvaluationRange, FarringtonConfig, GlrConfig,
        Threshold,
    };
    pub use crate::error::{ForecastError, Result};
    pub use crate::models::negbin::{Covariate, FittedModel, NegBinConfig, NegativeBinomialRegression};
    pub use crate::models::CountForecaster;
    pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineOutput};
    pub use crate::seasonality::FourierBasis;
    pub use crate::transform::{BoundaryPolicy, CalendarNormalizer, GapImputer, RawRecord};
    pub use crate::utils::{AccuracyEvaluator, AccuracyReport, CancellationToken};
}
