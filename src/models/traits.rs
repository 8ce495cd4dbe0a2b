//! Forecaster trait used by the backtester.

use crate::core::Series;
use crate::error::Result;
use crate::models::negbin::{Covariate, FittedModel};

/// A count model that can be fitted to a history window.
///
/// Implementations must be stateless between calls so that folds can be
/// fitted concurrently.
pub trait CountForecaster: Send + Sync {
    /// Fit the model to `history`, generating any features it needs from
    /// the window itself.
    fn fit_history(&self, history: &Series, covariate: Option<&Covariate>) -> Result<FittedModel>;

    /// Get the model name.
    fn name(&self) -> &str;
}
