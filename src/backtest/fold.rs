//! A single rolling-origin fold and its state machine.

use crate::core::{ForecastResult, Period, Series};
use crate::error::{ForecastError, Result};
use crate::models::negbin::{Covariate, FittedModel};
use crate::models::CountForecaster;
use tracing::{debug, warn};

/// Lifecycle of a fold: `Pending -> Fitting -> Forecasting -> Recorded`, or
/// `Failed` from `Fitting` or `Forecasting`.
#[derive(Debug, Clone, PartialEq)]
pub enum FoldState {
    Pending,
    Fitting,
    Forecasting(Box<FittedModel>),
    Recorded {
        fitted: Box<FittedModel>,
        forecast: ForecastResult,
    },
    Failed(ForecastError),
}

impl FoldState {
    pub fn name(&self) -> &'static str {
        match self {
            FoldState::Pending => "pending",
            FoldState::Fitting => "fitting",
            FoldState::Forecasting(_) => "forecasting",
            FoldState::Recorded { .. } => "recorded",
            FoldState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FoldState::Recorded { .. } | FoldState::Failed(_))
    }
}

/// One forecast compared with its realised value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPair {
    pub fold: usize,
    /// Last period available to the fit.
    pub origin: Period,
    pub period: Period,
    /// Steps ahead of the origin, starting at 1.
    pub step: usize,
    pub actual: f64,
    pub forecast: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ForecastPair {
    pub fn covered(&self) -> bool {
        self.lower <= self.actual && self.actual <= self.upper
    }
}

/// A fold owns copies of its fitting window and held-out horizon, so folds
/// can run independently.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestFold {
    index: usize,
    history: Series,
    holdout: Series,
    state: FoldState,
}

impl BacktestFold {
    pub fn new(index: usize, history: Series, holdout: Series) -> Self {
        Self {
            index,
            history,
            holdout,
            state: FoldState::Pending,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Last period of the fitting window (the forecast origin).
    pub fn cutoff(&self) -> Period {
        self.history.end()
    }

    pub fn history(&self) -> &Series {
        &self.history
    }

    pub fn holdout(&self) -> &Series {
        &self.holdout
    }

    pub fn state(&self) -> &FoldState {
        &self.state
    }

    /// Advance the fold by one state.
    ///
    /// Insufficient data or a non-converging fit move the fold to `Failed`
    /// and return `Ok`; any other error also marks it failed but is returned
    /// wrapped in `FoldFailed`.
    pub fn step<M>(&mut self, model: &M, covariate: Option<&Covariate>, level: f64) -> Result<()>
    where
        M: CountForecaster + ?Sized,
    {
        let current = std::mem::replace(&mut self.state, FoldState::Pending);
        let next = match current {
            FoldState::Pending => Ok(FoldState::Fitting),
            FoldState::Fitting => model
                .fit_history(&self.history, covariate)
                .map(|fitted| FoldState::Forecasting(Box::new(fitted))),
            FoldState::Forecasting(fitted) => self
                .forecast(&fitted, covariate, level)
                .map(|forecast| FoldState::Recorded { fitted, forecast }),
            terminal => Ok(terminal),
        };

        match next {
            Ok(state) => {
                debug!(fold = self.index, state = state.name(), "fold transition");
                self.state = state;
                Ok(())
            }
            Err(error) if error.is_fold_recoverable() => {
                warn!(
                    fold = self.index,
                    cutoff = %self.cutoff(),
                    code = error.code(),
                    %error,
                    "fold failed"
                );
                self.state = FoldState::Failed(error);
                Ok(())
            }
            Err(error) => {
                self.state = FoldState::Failed(error.clone());
                Err(ForecastError::FoldFailed {
                    fold: self.index,
                    cutoff: self.cutoff(),
                    source: Box::new(error),
                })
            }
        }
    }

    /// Step until the fold is `Recorded` or `Failed`.
    pub fn run<M>(&mut self, model: &M, covariate: Option<&Covariate>, level: f64) -> Result<()>
    where
        M: CountForecaster + ?Sized,
    {
        while !self.state.is_terminal() {
            self.step(model, covariate, level)?;
        }
        Ok(())
    }

    fn forecast(
        &self,
        fitted: &FittedModel,
        covariate: Option<&Covariate>,
        level: f64,
    ) -> Result<ForecastResult> {
        let targets = self.holdout.periods();
        let features = fitted.basis().features(&targets);
        fitted.predict(&targets, &features, covariate.map(|c| &c.series), level)
    }

    /// Forecast pairs for every held-out period with an observed value.
    /// Empty unless the fold is `Recorded`.
    pub fn pairs(&self) -> Vec<ForecastPair> {
        let FoldState::Recorded { forecast, .. } = &self.state else {
            return Vec::new();
        };
        let origin = self.cutoff();
        forecast
            .points()
            .iter()
            .enumerate()
            .filter_map(|(i, point)| {
                self.holdout.value(point.period).map(|actual| ForecastPair {
                    fold: self.index,
                    origin,
                    period: point.period,
                    step: i + 1,
                    actual,
                    forecast: point.mean,
                    lower: point.lower,
                    upper: point.upper,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Frequency;
    use crate::models::negbin::{NegBinConfig, NegativeBinomialRegression};
    use crate::seasonality::FourierBasis;

    fn model() -> NegativeBinomialRegression {
        NegativeBinomialRegression::new(FourierBasis::new(1, 52.0).unwrap(), NegBinConfig::default())
    }

    fn series(values: &[Option<f64>]) -> Series {
        Series::new(Period::from_ordinal(Frequency::Weekly, 2800), values.to_vec()).unwrap()
    }

    fn counts(n: usize) -> Vec<Option<f64>> {
        (0..n).map(|t| Some(20.0 + ((t * 7) % 5) as f64)).collect()
    }

    #[test]
    fn walks_through_every_state() {
        let full = series(&counts(40));
        let mut fold = BacktestFold::new(0, full.head(36).unwrap(), full.slice(36, 40).unwrap());
        let m = model();

        assert_eq!(fold.state().name(), "pending");
        fold.step(&m, None, 0.95).unwrap();
        assert_eq!(fold.state().name(), "fitting");
        fold.step(&m, None, 0.95).unwrap();
        assert_eq!(fold.state().name(), "forecasting");
        fold.step(&m, None, 0.95).unwrap();
        assert_eq!(fold.state().name(), "recorded");
        // terminal states are stable
        fold.step(&m, None, 0.95).unwrap();
        assert!(fold.state().is_terminal());

        let pairs = fold.pairs();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0].step, 1);
        assert_eq!(pairs[0].origin, full.period_at(35));
        assert_eq!(pairs[3].period, full.end());
    }

    #[test]
    fn missing_actuals_produce_no_pair() {
        let mut values = counts(40);
        values[38] = None;
        let full = series(&values);
        let mut fold = BacktestFold::new(2, full.head(36).unwrap(), full.slice(36, 40).unwrap());
        fold.run(&model(), None, 0.95).unwrap();
        let pairs = fold.pairs();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|p| p.fold == 2));
        assert!(pairs.iter().all(|p| p.period != full.period_at(38)));
    }

    #[test]
    fn insufficient_history_marks_the_fold_failed() {
        let full = series(&counts(6));
        let mut fold = BacktestFold::new(1, full.head(3).unwrap(), full.slice(3, 6).unwrap());
        fold.run(&model(), None, 0.95).unwrap();
        assert!(matches!(
            fold.state(),
            FoldState::Failed(ForecastError::InsufficientData { .. })
        ));
        assert!(fold.pairs().is_empty());
    }

    #[test]
    fn other_errors_abort_with_fold_context() {
        let full = series(&counts(40));
        let mut fold = BacktestFold::new(4, full.head(36).unwrap(), full.slice(36, 40).unwrap());
        let err = fold.run(&model(), None, 1.5).unwrap_err();
        match err {
            ForecastError::FoldFailed { fold, cutoff, source } => {
                assert_eq!(fold, 4);
                assert_eq!(cutoff, full.period_at(35));
                assert!(matches!(*source, ForecastError::InvalidParameter(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(fold.state().name(), "failed");
    }
}
