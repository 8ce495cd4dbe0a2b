//! Rolling-origin backtesting.
//!
//! The series is cut at successive origins; at each origin the model is fitted
//! on the periods before the cutoff and asked to forecast the next `horizon`
//! periods, which are then compared with what was actually observed.
//!
//! Folds are independent and may run in parallel; their results are merged in
//! fold order once every fold has finished.

mod fold;

pub use fold::{BacktestFold, FoldState, ForecastPair};

use crate::core::{Period, Series};
use crate::error::{ForecastError, Result};
use crate::models::negbin::Covariate;
use crate::models::CountForecaster;
use crate::utils::metrics::{AccuracyEvaluator, AccuracyReport};
use crate::utils::CancellationToken;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// How the fitting window moves between folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowStrategy {
    /// Fit on every period before the cutoff.
    #[default]
    Expanding,
    /// Fit on the `initial_window` periods before the cutoff.
    Rolling,
}

/// Configuration for a rolling-origin backtest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestConfig {
    /// Periods in the first fitting window.
    pub initial_window: usize,
    /// Periods forecast at each origin.
    pub horizon: usize,
    /// Periods the origin advances between folds.
    pub step: usize,
    pub strategy: WindowStrategy,
    /// Prediction interval level.
    pub level: f64,
    /// Lag of the naive benchmark scaling MASE.
    pub seasonal_lag: usize,
    /// Run folds on the rayon thread pool.
    pub parallel: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_window: 104,
            horizon: 4,
            step: 1,
            strategy: WindowStrategy::Expanding,
            level: 0.95,
            seasonal_lag: 1,
            parallel: false,
        }
    }
}

impl BacktestConfig {
    /// Expanding-window backtest.
    pub fn expanding(initial_window: usize, horizon: usize) -> Self {
        Self {
            initial_window,
            horizon,
            ..Self::default()
        }
    }

    /// Rolling-window backtest with a fixed window length.
    pub fn rolling(window: usize, horizon: usize) -> Self {
        Self {
            initial_window: window,
            horizon,
            strategy: WindowStrategy::Rolling,
            ..Self::default()
        }
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }

    pub fn with_seasonal_lag(mut self, lag: usize) -> Self {
        self.seasonal_lag = lag;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("initial_window", self.initial_window),
            ("horizon", self.horizon),
            ("step", self.step),
            ("seasonal_lag", self.seasonal_lag),
        ] {
            if value == 0 {
                return Err(ForecastError::InvalidParameter(format!(
                    "{name} must be positive"
                )));
            }
        }
        if !(self.level > 0.0 && self.level < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "level must be in (0, 1), got {}",
                self.level
            )));
        }
        Ok(())
    }

    /// Number of folds for a series of `len` periods.
    pub fn fold_count(&self, len: usize) -> usize {
        if self.step == 0 || len < self.initial_window + self.horizon {
            return 0;
        }
        (len - self.initial_window - self.horizon) / self.step + 1
    }
}

/// Outcome of one fold, without its windows.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldSummary {
    pub index: usize,
    pub cutoff: Period,
    /// First and last period of the fitting window.
    pub window: (Period, Period),
    /// `None` when the fold was recorded.
    pub error: Option<ForecastError>,
    /// Dispersion of the fold's fit.
    pub theta: Option<f64>,
    pub pairs: usize,
}

impl FoldSummary {
    pub fn recorded(&self) -> bool {
        self.error.is_none()
    }
}

/// Merged results of a backtest.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestReport {
    pub folds: Vec<FoldSummary>,
    /// All forecast pairs, ordered by fold then step.
    pub pairs: Vec<ForecastPair>,
    pub failed_folds: usize,
    /// Accuracy over every pair.
    pub accuracy: AccuracyReport,
    /// Accuracy per horizon step; index 0 is one step ahead.
    pub horizon_accuracy: Vec<AccuracyReport>,
    /// Share of actuals inside their prediction interval.
    pub coverage: Option<f64>,
}

impl BacktestReport {
    pub fn n_folds(&self) -> usize {
        self.folds.len()
    }

    pub fn recorded_folds(&self) -> usize {
        self.folds.len() - self.failed_folds
    }

    pub fn pairs_for_step(&self, step: usize) -> impl Iterator<Item = &ForecastPair> {
        self.pairs.iter().filter(move |p| p.step == step)
    }
}

/// Rolling-origin backtester.
///
/// # Example
/// ```
/// use epicast::backtest::{BacktestConfig, Backtester};
/// use epicast::core::{Frequency, Period, Series};
/// use epicast::models::negbin::{NegBinConfig, NegativeBinomialRegression};
/// use epicast::seasonality::FourierBasis;
///
/// let start = Period::from_ordinal(Frequency::Weekly, 2800);
/// let values: Vec<f64> = (0..30).map(|t| 20.0 + (t % 4) as f64).collect();
/// let series = Series::from_values(start, &values).unwrap();
///
/// let model = NegativeBinomialRegression::new(FourierBasis::new(1, 52.0).unwrap(), NegBinConfig::default());
/// let report = Backtester::new(model, BacktestConfig::expanding(20, 2)).run(&series).unwrap();
/// assert_eq!(report.n_folds(), 30 - 2 - 20 + 1);
/// ```
#[derive(Debug, Clone)]
pub struct Backtester<M> {
    model: M,
    config: BacktestConfig,
    covariate: Option<Covariate>,
}

impl<M: CountForecaster> Backtester<M> {
    pub fn new(model: M, config: BacktestConfig) -> Self {
        Self {
            model,
            config,
            covariate: None,
        }
    }

    /// Use a lagged covariate. Values inside the forecast horizon are taken
    /// from the supplied series as they are.
    pub fn with_covariate(mut self, covariate: Covariate) -> Self {
        self.covariate = Some(covariate);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Split `series` into pending folds.
    pub fn folds(&self, series: &Series) -> Result<Vec<BacktestFold>> {
        self.config.validate()?;
        let BacktestConfig {
            initial_window,
            horizon,
            step,
            strategy,
            ..
        } = self.config;

        let mut folds = Vec::with_capacity(self.config.fold_count(series.len()));
        let mut cutoff = initial_window;
        while cutoff + horizon <= series.len() {
            let start = match strategy {
                WindowStrategy::Expanding => 0,
                WindowStrategy::Rolling => cutoff - initial_window,
            };
            folds.push(BacktestFold::new(
                folds.len(),
                series.slice(start, cutoff)?,
                series.slice(cutoff, cutoff + horizon)?,
            ));
            cutoff += step;
        }
        Ok(folds)
    }

    pub fn run(&self, series: &Series) -> Result<BacktestReport> {
        self.run_with_cancellation(series, &CancellationToken::new())
    }

    /// Run every fold, checking `token` before each fold starts.
    pub fn run_with_cancellation(
        &self,
        series: &Series,
        token: &CancellationToken,
    ) -> Result<BacktestReport> {
        let folds = self.folds(series)?;
        let completed = AtomicUsize::new(0);

        let execute = |mut fold: BacktestFold| -> Result<BacktestFold> {
            if token.is_cancelled() {
                return Err(ForecastError::Cancelled {
                    completed: completed.load(Ordering::SeqCst),
                });
            }
            fold.run(&self.model, self.covariate.as_ref(), self.config.level)?;
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(fold)
        };

        let mut finished: Vec<BacktestFold> = if self.config.parallel {
            folds.into_par_iter().map(execute).collect::<Result<_>>()?
        } else {
            folds.into_iter().map(execute).collect::<Result<_>>()?
        };
        finished.sort_by_key(|f| f.index());

        self.merge(series, &finished)
    }

    fn merge(&self, series: &Series, folds: &[BacktestFold]) -> Result<BacktestReport> {
        let mut summaries = Vec::with_capacity(folds.len());
        let mut pairs = Vec::new();
        for fold in folds {
            let fold_pairs = fold.pairs();
            let (error, theta) = match fold.state() {
                FoldState::Failed(error) => (Some(error.clone()), None),
                FoldState::Recorded { fitted, .. } => (None, Some(fitted.theta())),
                _ => (None, None),
            };
            summaries.push(FoldSummary {
                index: fold.index(),
                cutoff: fold.cutoff(),
                window: (fold.history().start(), fold.history().end()),
                error,
                theta,
                pairs: fold_pairs.len(),
            });
            pairs.extend(fold_pairs);
        }
        let failed_folds = summaries.iter().filter(|s| !s.recorded()).count();

        // MASE is scaled on the first fitting window only. Missing values stay
        // in place as NaN so lagged differences never pair the wrong periods.
        let scale_window = series.head(self.config.initial_window.min(series.len()))?;
        let in_sample: Vec<f64> = scale_window
            .values()
            .iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        let evaluator = AccuracyEvaluator::new(self.config.seasonal_lag);

        let accuracy = evaluate(&evaluator, pairs.iter(), &in_sample)?;
        let horizon_accuracy = (1..=self.config.horizon)
            .map(|step| evaluate(&evaluator, pairs.iter().filter(|p| p.step == step), &in_sample))
            .collect::<Result<Vec<_>>>()?;
        let coverage = if pairs.is_empty() {
            None
        } else {
            Some(pairs.iter().filter(|p| p.covered()).count() as f64 / pairs.len() as f64)
        };

        info!(
            model = self.model.name(),
            folds = summaries.len(),
            failed = failed_folds,
            pairs = pairs.len(),
            rmse = ?accuracy.rmse(),
            mae = ?accuracy.mae(),
            coverage = ?coverage,
            "backtest complete"
        );

        Ok(BacktestReport {
            folds: summaries,
            pairs,
            failed_folds,
            accuracy,
            horizon_accuracy,
            coverage,
        })
    }
}

fn evaluate<'a>(
    evaluator: &AccuracyEvaluator,
    pairs: impl Iterator<Item = &'a ForecastPair>,
    in_sample: &[f64],
) -> Result<AccuracyReport> {
    let (actual, forecast): (Vec<f64>, Vec<f64>) = pairs.map(|p| (p.actual, p.forecast)).unzip();
    evaluator.evaluate(&actual, &forecast, in_sample)
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

    fn series(n: usize) -> Series {
        let values: Vec<f64> = (0..n).map(|t| 30.0 + ((t * 3) % 7) as f64).collect();
        Series::from_values(Period::from_ordinal(Frequency::Weekly, 2800), &values).unwrap()
    }

    #[test]
    fn fold_count_formula() {
        let config = BacktestConfig::expanding(20, 4);
        assert_eq!(config.fold_count(30), 30 - 4 - 20 + 1);
        assert_eq!(config.fold_count(24), 1);
        assert_eq!(config.fold_count(23), 0);
        assert_eq!(config.with_step(3).fold_count(30), 3);
    }

    #[test]
    fn expanding_and_rolling_windows() {
        let s = series(30);
        let expanding = Backtester::new(model(), BacktestConfig::expanding(20, 2))
            .folds(&s)
            .unwrap();
        assert_eq!(expanding.len(), 9);
        assert_eq!(expanding[0].history().len(), 20);
        assert_eq!(expanding[8].history().len(), 28);
        assert!(expanding.iter().all(|f| f.history().start() == s.start()));

        let rolling = Backtester::new(model(), BacktestConfig::rolling(20, 2))
            .folds(&s)
            .unwrap();
        assert_eq!(rolling.len(), 9);
        assert!(rolling.iter().all(|f| f.history().len() == 20));
        assert_eq!(rolling[3].history().start(), s.period_at(3));
        assert_eq!(rolling[3].holdout().start(), s.period_at(23));
    }

    #[test]
    fn short_series_has_no_folds() {
        let report = Backtester::new(model(), BacktestConfig::expanding(20, 4))
            .run(&series(10))
            .unwrap();
        assert_eq!(report.n_folds(), 0);
        assert!(report.pairs.is_empty());
        assert!(report.accuracy.is_empty());
        assert_eq!(report.coverage, None);
    }

    #[test]
    fn report_collects_pairs_in_fold_order() {
        let report = Backtester::new(model(), BacktestConfig::expanding(24, 3))
            .run(&series(32))
            .unwrap();
        assert_eq!(report.n_folds(), 6);
        assert_eq!(report.failed_folds, 0);
        assert_eq!(report.pairs.len(), 18);
        assert!(report.pairs.windows(2).all(|w| w[0].fold <= w[1].fold));
        assert_eq!(report.horizon_accuracy.len(), 3);
        assert_eq!(report.pairs_for_step(2).count(), 6);
        assert!(report.accuracy.rmse().unwrap() >= report.accuracy.mae().unwrap());
        let coverage = report.coverage.unwrap();
        assert!((0.0..=1.0).contains(&coverage));
    }

    #[test]
    fn mase_scale_skips_differences_across_gaps() {
        let mut values: Vec<Option<f64>> = (0..30).map(|t| Some(30.0 + t as f64)).collect();
        values[10] = Some(500.0);
        values[5] = None;
        let s = Series::new(Period::from_ordinal(Frequency::Weekly, 2800), values).unwrap();
        let report = Backtester::new(model(), BacktestConfig::expanding(20, 2))
            .run(&s)
            .unwrap();

        // 19 lag-1 differences, two touch the gap; of the other 17, the two
        // around the outlier are 461 and 459 and the rest are 1.
        let scale = (15.0 + 461.0 + 459.0) / 17.0;
        let mae = report.accuracy.mae().unwrap();
        approx::assert_relative_eq!(report.accuracy.mase().unwrap(), mae / scale, max_relative = 1e-12);
    }

    #[test]
    fn parallel_matches_sequential() {
        let s = series(36);
        let config = BacktestConfig::expanding(24, 2);
        let sequential = Backtester::new(model(), config).run(&s).unwrap();
        let parallel = Backtester::new(model(), config.with_parallel(true))
            .run(&s)
            .unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let err = Backtester::new(model(), BacktestConfig::expanding(20, 2))
            .run_with_cancellation(&series(30), &token)
            .unwrap_err();
        assert_eq!(err, ForecastError::Cancelled { completed: 0 });
    }

    #[test]
    fn invalid_config_is_rejected() {
        let backtester = Backtester::new(model(), BacktestConfig::expanding(0, 2));
        assert!(matches!(
            backtester.run(&series(30)),
            Err(ForecastError::InvalidParameter(_))
        ));
        assert!(BacktestConfig::default().with_level(0.0).validate().is_err());
    }
}
