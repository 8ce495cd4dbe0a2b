//! Utility functions shared by the models, backtester and detectors.

pub mod cancel;
pub mod linalg;
pub mod metrics;
pub mod stats;

pub use cancel::CancellationToken;
pub use linalg::{wls_fit, WlsResult};
pub use metrics::{AccuracyEvaluator, AccuracyReport, Metric};
pub use stats::{nb_quantile, quantile_normal};
