//! End-to-end forecasting and surveillance runs over raw records.
//!
//! [`Pipeline::run`] aligns records on the period grid, masks periods with
//! known reporting problems, fills gaps, backtests the negative binomial
//! Fourier model and finally fits it on the whole history to forecast the
//! periods after the last observation. [`Pipeline::detect`] runs an
//! aberration detector on the aligned counts without imputation.

use crate::backtest::{BacktestConfig, BacktestReport, Backtester};
use crate::core::{ForecastResult, Frequency, Period};
use crate::detection::{AberrationDetector, DetectorStrategy, EvaluationRange, Threshold};
use crate::error::{ForecastError, Result};
use crate::models::negbin::{Covariate, FittedModel, NegBinConfig, NegativeBinomialRegression};
use crate::models::CountForecaster;
use crate::seasonality::FourierBasis;
use crate::transform::{
    BoundaryPolicy, CalendarNormalizer, DuplicatePolicy, GapImputer, Imputation, NormalizedSeries,
    RawRecord,
};
use crate::utils::CancellationToken;
use tracing::info;

/// Name given to the covariate carried by raw records.
pub const RECORD_COVARIATE: &str = "covariate";

/// Configuration of a full pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub frequency: Frequency,
    pub duplicate_policy: DuplicatePolicy,
    pub boundary: BoundaryPolicy,
    /// Periods whose counts are treated as missing before imputation.
    pub masked_periods: Vec<Period>,
    pub harmonics: usize,
    pub periods_per_cycle: f64,
    pub negbin: NegBinConfig,
    pub backtest: BacktestConfig,
    /// Periods forecast after the last observation.
    pub forecast_horizon: usize,
    /// Lag of the record covariate; `None` fits counts only.
    pub covariate_lag: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frequency: Frequency::Weekly,
            duplicate_policy: DuplicatePolicy::default(),
            boundary: BoundaryPolicy::default(),
            masked_periods: Vec::new(),
            harmonics: 2,
            periods_per_cycle: 52.0,
            negbin: NegBinConfig::default(),
            backtest: BacktestConfig::default(),
            forecast_horizon: 4,
            covariate_lag: None,
        }
    }
}

impl PipelineConfig {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            periods_per_cycle: frequency.periods_per_year(),
            ..Self::default()
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryPolicy) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_masked_periods(mut self, periods: Vec<Period>) -> Self {
        self.masked_periods = periods;
        self
    }

    pub fn with_harmonics(mut self, harmonics: usize, periods_per_cycle: f64) -> Self {
        self.harmonics = harmonics;
        self.periods_per_cycle = periods_per_cycle;
        self
    }

    pub fn with_negbin(mut self, negbin: NegBinConfig) -> Self {
        self.negbin = negbin;
        self
    }

    pub fn with_backtest(mut self, backtest: BacktestConfig) -> Self {
        self.backtest = backtest;
        self
    }

    pub fn with_forecast_horizon(mut self, horizon: usize) -> Self {
        self.forecast_horizon = horizon;
        self
    }

    pub fn with_covariate_lag(mut self, lag: Option<usize>) -> Self {
        self.covariate_lag = lag;
        self
    }

    pub fn validate(&self) -> Result<()> {
        FourierBasis::new(self.harmonics, self.periods_per_cycle)?;
        self.negbin.validate()?;
        self.backtest.validate()?;
        if self
            .masked_periods
            .iter()
            .any(|p| p.frequency() != self.frequency)
        {
            return Err(ForecastError::InvalidParameter(format!(
                "masked periods must have {:?} frequency",
                self.frequency
            )));
        }
        Ok(())
    }
}

/// Everything a pipeline run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub normalized: NormalizedSeries,
    pub imputation: Imputation,
    pub backtest: BacktestReport,
    /// Model fitted on the whole imputed history.
    pub model: FittedModel,
    pub forecast: ForecastResult,
}

/// Runs the preparation, backtesting and forecasting stages in order.
///
/// # Example
/// ```
/// use epicast::backtest::BacktestConfig;
/// use epicast::core::Frequency;
/// use epicast::pipeline::{Pipeline, PipelineConfig};
/// use epicast::transform::RawRecord;
///
/// let records: Vec<RawRecord> = (1..=40)
///     .map(|w| RawRecord::new(format!("2023-W{w:02}"), 30.0 + (w % 3) as f64))
///     .collect();
/// let config = PipelineConfig::new(Frequency::Weekly)
///     .with_harmonics(1, 52.0)
///     .with_backtest(BacktestConfig::expanding(30, 4))
///     .with_forecast_horizon(2);
/// let output = Pipeline::new(config).unwrap().run(&records).unwrap();
/// assert_eq!(output.forecast.horizon(), 2);
/// assert_eq!(output.backtest.n_folds(), 40 - 4 - 30 + 1);
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn normalizer(&self) -> CalendarNormalizer {
        CalendarNormalizer::new(self.config.frequency)
            .with_duplicate_policy(self.config.duplicate_policy)
    }

    fn model(&self) -> Result<NegativeBinomialRegression> {
        let basis = FourierBasis::new(self.config.harmonics, self.config.periods_per_cycle)?;
        Ok(NegativeBinomialRegression::new(basis, self.config.negbin))
    }

    /// Lagged record covariate, with interior gaps interpolated.
    fn covariate(&self, normalized: &NormalizedSeries) -> Result<Option<Covariate>> {
        let Some(lag) = self.config.covariate_lag else {
            return Ok(None);
        };
        let series = normalized.covariate.as_ref().ok_or_else(|| {
            ForecastError::InvalidParameter("no record carries a covariate value".to_string())
        })?;
        let filled = GapImputer::new(BoundaryPolicy::LeaveMissing).impute(series)?;
        Ok(Some(Covariate::new(RECORD_COVARIATE, filled.imputed, lag)))
    }

    pub fn run(&self, records: &[RawRecord]) -> Result<PipelineOutput> {
        self.run_with_cancellation(records, &CancellationToken::new())
    }

    /// Like [`Pipeline::run`], checking `token` before each backtest fold.
    pub fn run_with_cancellation(
        &self,
        records: &[RawRecord],
        token: &CancellationToken,
    ) -> Result<PipelineOutput> {
        let normalized = self.normalizer().normalize(records)?;
        let masked = normalized.series.masked(&self.config.masked_periods)?;
        let imputation = GapImputer::new(self.config.boundary).impute(&masked)?;
        let covariate = self.covariate(&normalized)?;
        let model = self.model()?;

        let mut backtester = Backtester::new(model, self.config.backtest);
        if let Some(c) = &covariate {
            backtester = backtester.with_covariate(c.clone());
        }
        let backtest = backtester.run_with_cancellation(&imputation.imputed, token)?;

        let fitted = model.fit_history(&imputation.imputed, covariate.as_ref())?;
        let forecast = fitted.forecast(
            self.config.forecast_horizon,
            covariate.as_ref().map(|c| &c.series),
            self.config.backtest.level,
        )?;

        info!(
            periods = imputation.imputed.len(),
            imputed = imputation.filled.len(),
            masked = self.config.masked_periods.len(),
            folds = backtest.n_folds(),
            horizon = forecast.horizon(),
            "pipeline finished"
        );

        Ok(PipelineOutput {
            normalized,
            imputation,
            backtest,
            model: fitted,
            forecast,
        })
    }

    /// Align `records` and evaluate `range` with `detector`. Missing counts
    /// are left missing.
    pub fn detect(
        &self,
        records: &[RawRecord],
        detector: &DetectorStrategy,
        range: EvaluationRange,
    ) -> Result<Vec<Threshold>> {
        let normalized = self.normalizer().normalize(records)?;
        let series = normalized.series.masked(&self.config.masked_periods)?;
        detector.detect(&series, range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::FarringtonConfig;

    fn records(n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| {
                let week = i % 52 + 1;
                let year = 2021 + i / 52;
                let count = (3.0 + 0.4 * (2.0 * std::f64::consts::PI * week as f64 / 52.0).sin()).exp();
                RawRecord::new(format!("{year}-W{week:02}"), count.round())
                    .with_covariate(10.0 + (i % 7) as f64)
            })
            .collect()
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new(Frequency::Weekly)
            .with_harmonics(1, 52.0)
            .with_backtest(BacktestConfig::expanding(60, 4).with_step(4))
            .with_forecast_horizon(3)
    }

    #[test]
    fn runs_every_stage() {
        let output = Pipeline::new(config()).unwrap().run(&records(80)).unwrap();
        assert_eq!(output.imputation.imputed.len(), 80);
        assert!(output.imputation.filled.is_empty());
        assert_eq!(output.backtest.n_folds(), 5);
        assert_eq!(output.backtest.failed_folds, 0);
        assert_eq!(output.forecast.horizon(), 3);
        assert_eq!(
            output.forecast.points()[0].period,
            output.imputation.imputed.end().succ()
        );
        assert_eq!(output.model.training_window().1, output.imputation.imputed.end());
    }

    #[test]
    fn masked_periods_are_imputed() {
        let raw = records(80);
        let normalizer = CalendarNormalizer::new(Frequency::Weekly);
        let series = normalizer.normalize(&raw).unwrap().series;
        let masked = vec![series.period_at(40), series.period_at(41)];

        let output = Pipeline::new(config().with_masked_periods(masked.clone()))
            .unwrap()
            .run(&raw)
            .unwrap();
        assert_eq!(output.imputation.filled, masked);
        assert!(output.imputation.imputed.is_complete());
    }

    #[test]
    fn covariate_requires_lag_beyond_the_horizon() {
        let raw = records(80);
        let lagged = Pipeline::new(config().with_covariate_lag(Some(3)))
            .unwrap()
            .run(&raw)
            .unwrap();
        assert!(lagged.model.coefficient(&crate::models::negbin::Term::Covariate {
            name: RECORD_COVARIATE.to_string(),
            lag: 3,
        })
        .is_some());

        let err = Pipeline::new(config().with_covariate_lag(Some(1)))
            .unwrap()
            .run(&raw)
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_COVARIATE");
    }

    #[test]
    fn detects_on_aligned_counts() {
        let mut raw = records(60);
        raw.push(RawRecord::new("2022-W09", 400.0));
        let series = CalendarNormalizer::new(Frequency::Weekly)
            .normalize(&raw)
            .unwrap()
            .series;
        let range = EvaluationRange::single(series.end());
        let thresholds = Pipeline::new(config())
            .unwrap()
            .detect(
                &raw,
                &DetectorStrategy::Reweighted(FarringtonConfig::trailing(20)),
                range,
            )
            .unwrap();
        assert_eq!(thresholds.len(), 1);
        assert!(thresholds[0].alarm);
    }

    #[test]
    fn cancellation_stops_the_backtest() {
        let token = CancellationToken::new();
        token.cancel();
        let err = Pipeline::new(config())
            .unwrap()
            .run_with_cancellation(&records(80), &token)
            .unwrap_err();
        assert_eq!(err, ForecastError::Cancelled { completed: 0 });
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        assert!(Pipeline::new(config().with_harmonics(0, 52.0)).is_err());
        assert!(Pipeline::new(config().with_backtest(BacktestConfig::expanding(0, 4))).is_err());
    }
}
