//! Error types for the epicast library.

use crate::core::Period;
use thiserror::Error;

/// Result type alias for epicast operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors that can occur while preparing, fitting, forecasting or monitoring
/// count series.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    /// Input data is empty.
    #[error("empty input data")]
    EmptyData,

    /// Insufficient data points for the operation.
    #[error("insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Dimension mismatch between data structures.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A raw timestamp could not be mapped onto a period.
    #[error("malformed timestamp: {0:?}")]
    MalformedTimestamp(String),

    /// Missing values at the start or end of a series have no neighbour on
    /// one side.
    #[error("cannot interpolate missing value at series boundary ({period})")]
    UninterpolableBoundary { period: Period },

    /// The regression solver did not converge.
    #[error("model fit did not converge: {0}")]
    FitNonconvergent(String),

    /// Requested range lies outside the known extent of the data.
    #[error("range {first}..={last} outside data extent {extent_first}..={extent_last}")]
    RangeOutOfBounds {
        first: Period,
        last: Period,
        extent_first: Period,
        extent_last: Period,
    },

    /// Number of seasonal feature sets does not match the target periods.
    #[error("feature horizon mismatch: expected {expected} feature sets, got {got}")]
    FeatureHorizonMismatch { expected: usize, got: usize },

    /// The lagged covariate has no value for a period the model needs.
    #[error("covariate value missing for {period}")]
    MissingCovariate { period: Period },

    /// A backtest fold failed with an error that is fatal to the run.
    #[error("fold {fold} (cutoff {cutoff}) failed: {source}")]
    FoldFailed {
        fold: usize,
        cutoff: Period,
        #[source]
        source: Box<ForecastError>,
    },

    /// The operation was cancelled between units of work.
    #[error("cancelled after {completed} completed folds")]
    Cancelled { completed: usize },
}

impl ForecastError {
    /// Stable, language-neutral code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyData => "EMPTY_DATA",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::InvalidParameter(_) => "INVALID_PARAMETER",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::MalformedTimestamp(_) => "MALFORMED_TIMESTAMP",
            Self::UninterpolableBoundary { .. } => "UNINTERPOLABLE_BOUNDARY",
            Self::FitNonconvergent(_) => "FIT_NONCONVERGENT",
            Self::RangeOutOfBounds { .. } => "RANGE_OUT_OF_BOUNDS",
            Self::FeatureHorizonMismatch { .. } => "FEATURE_HORIZON_MISMATCH",
            Self::MissingCovariate { .. } => "MISSING_COVARIATE",
            Self::FoldFailed { .. } => "FOLD_FAILED",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Whether a backtest fold hitting this error is recorded as failed
    /// instead of aborting the run.
    pub fn is_fold_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. } | Self::FitNonconvergent(_)
        )
    }
}
