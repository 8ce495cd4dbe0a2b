//! Integration tests for rolling-origin backtesting and the forecasting
//! pipeline.

use chrono::{Duration, NaiveDate};
use epicast::backtest::{BacktestConfig, Backtester, WindowStrategy};
use epicast::core::{Frequency, Period, Series};
use epicast::error::ForecastError;
use epicast::models::negbin::{Covariate, NegBinConfig, NegativeBinomialRegression, Term};
use epicast::pipeline::{Pipeline, PipelineConfig};
use epicast::seasonality::FourierBasis;
use epicast::transform::{BoundaryPolicy, DuplicatePolicy, RawRecord};
use epicast::utils::{AccuracyEvaluator, CancellationToken};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const START: i64 = 2800;

fn start() -> Period {
    Period::from_ordinal(Frequency::Weekly, START)
}

/// Noise-free `exp(3 + 0.4 sin + 0.2 cos)` on the absolute week ordinal.
fn sinusoid(n: usize) -> Vec<f64> {
    (0..n)
        .map(|t| {
            let phase = 2.0 * std::f64::consts::PI * (START + t as i64) as f64 / 52.0;
            (3.0 + 0.4 * phase.sin() + 0.2 * phase.cos()).exp()
        })
        .collect()
}

fn model(harmonics: usize) -> NegativeBinomialRegression {
    NegativeBinomialRegression::new(
        FourierBasis::new(harmonics, 52.0).unwrap(),
        NegBinConfig::default(),
    )
}

#[test]
fn noise_free_sinusoid_is_forecast_exactly() {
    let series = Series::from_values(start(), &sinusoid(140)).unwrap();
    let report = Backtester::new(model(1), BacktestConfig::expanding(104, 8).with_step(4))
        .run(&series)
        .unwrap();

    assert_eq!(report.n_folds(), (140 - 8 - 104) / 4 + 1);
    assert_eq!(report.failed_folds, 0);
    assert_eq!(report.pairs.len(), report.n_folds() * 8);
    for pair in &report.pairs {
        assert!((pair.forecast - pair.actual).abs() / pair.actual < 1e-4);
        assert!(pair.covered());
    }
    assert!(report.accuracy.rmse().unwrap() < 1e-2);
    assert_eq!(report.coverage, Some(1.0));
    assert_eq!(report.horizon_accuracy.len(), 8);
}

#[test]
fn pairs_are_ordered_by_fold_then_step() {
    let series = Series::from_values(start(), &sinusoid(80)).unwrap();
    let config = BacktestConfig::rolling(52, 3).with_step(5);
    let report = Backtester::new(model(1), config).run(&series).unwrap();

    let order: Vec<(usize, usize)> = report.pairs.iter().map(|p| (p.fold, p.step)).collect();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);

    for summary in &report.folds {
        let (first, last) = summary.window;
        assert_eq!(first.distance(&last), 51);
        assert_eq!(last, summary.cutoff);
        assert!(summary.theta.is_some());
    }
    assert_eq!(report.pairs_for_step(1).count(), report.n_folds());
}

#[test]
fn short_windows_fail_without_aborting_the_run() {
    let series = Series::from_values(start(), &sinusoid(12)).unwrap();
    let report = Backtester::new(model(1), BacktestConfig::expanding(2, 1))
        .run(&series)
        .unwrap();

    assert_eq!(report.n_folds(), 10);
    // intercept, trend and one sine/cosine pair need four observations
    for summary in &report.folds[..2] {
        assert!(matches!(
            summary.error,
            Some(ForecastError::InsufficientData { needed: 4, .. })
        ));
    }
    assert_eq!(report.recorded_folds() + report.failed_folds, report.n_folds());
    assert!(report.pairs.iter().all(|p| p.fold >= 2));
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let mut rng = StdRng::seed_from_u64(5);
    let values: Vec<f64> = sinusoid(120)
        .into_iter()
        .map(|m| (m * rng.gen_range(0.7..1.3)).round())
        .collect();
    let series = Series::from_values(start(), &values).unwrap();
    let config = BacktestConfig::expanding(70, 4).with_step(3);

    let sequential = Backtester::new(model(2), config).run(&series).unwrap();
    let parallel = Backtester::new(model(2), config.with_parallel(true))
        .run(&series)
        .unwrap();
    assert_eq!(sequential, parallel);
    assert!(sequential.accuracy.mase().is_some());

    // MASE is scaled on the first fitting window.
    let actual: Vec<f64> = sequential.pairs.iter().map(|p| p.actual).collect();
    let forecast: Vec<f64> = sequential.pairs.iter().map(|p| p.forecast).collect();
    let in_sample = series.head(70).unwrap().observed();
    let again = AccuracyEvaluator::new(1)
        .evaluate(&actual, &forecast, &in_sample)
        .unwrap();
    assert_eq!(again, sequential.accuracy);
}

#[test]
fn covariate_enters_every_fold() {
    let values = sinusoid(90);
    let temperature: Vec<f64> = (0..90).map(|t| 15.0 + 5.0 * ((t % 13) as f64 / 13.0)).collect();
    let counts: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(t, m)| {
            let lagged = if t >= 2 { temperature[t - 2] } else { 15.0 };
            m * (0.03 * (lagged - 15.0)).exp()
        })
        .collect();
    let series = Series::from_values(start(), &counts).unwrap();
    let covariate = Covariate::new(
        "temperature",
        Series::from_values(start(), &temperature).unwrap(),
        2,
    );

    let report = Backtester::new(model(1), BacktestConfig::expanding(60, 2).with_step(7))
        .with_covariate(covariate.clone())
        .run(&series)
        .unwrap();
    assert_eq!(report.failed_folds, 0);
    assert!(report.accuracy.rmse().unwrap() < 1e-2);

    use epicast::models::CountForecaster;
    let fitted = model(1).fit_history(&series, Some(&covariate)).unwrap();
    let beta = fitted
        .coefficient(&Term::Covariate {
            name: "temperature".to_string(),
            lag: 2,
        })
        .unwrap();
    assert!((beta - 0.03).abs() < 1e-6);
}

#[test]
fn cancelled_token_stops_before_the_first_fold() {
    let series = Series::from_values(start(), &sinusoid(60)).unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let err = Backtester::new(model(1), BacktestConfig::expanding(40, 2).with_parallel(true))
        .run_with_cancellation(&series, &token)
        .unwrap_err();
    assert_eq!(err, ForecastError::Cancelled { completed: 0 });
}

#[test]
fn pipeline_aggregates_daily_records_into_weeks() {
    // Daily case counts for 130 weeks starting on a Monday, with one week
    // of reporting missing entirely.
    let monday = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
    let weekly = sinusoid(130);
    let records: Vec<RawRecord> = (0..130 * 7)
        .filter(|d| !(497..504).contains(d))
        .map(|d| {
            let date = monday + Duration::days(d as i64);
            RawRecord::new(date, (weekly[d / 7] / 7.0).round())
        })
        .collect();

    let config = PipelineConfig::new(Frequency::Weekly)
        .with_duplicate_policy(DuplicatePolicy::Sum)
        .with_boundary(BoundaryPolicy::Fail)
        .with_harmonics(1, 52.0)
        .with_backtest(BacktestConfig::expanding(104, 4).with_step(2))
        .with_forecast_horizon(6);
    let output = Pipeline::new(config).unwrap().run(&records).unwrap();

    assert_eq!(output.normalized.series.len(), 130);
    assert_eq!(output.normalized.missing.len(), 1);
    assert_eq!(output.imputation.filled, output.normalized.missing);
    assert_eq!(output.backtest.n_folds(), (130 - 4 - 104) / 2 + 1);
    assert_eq!(output.forecast.horizon(), 6);
    for point in output.forecast.points() {
        assert!(point.lower <= point.mean && point.mean <= point.upper);
        assert!(point.mean_lower <= point.mean && point.mean <= point.mean_upper);
    }
}

#[test]
fn invalid_backtest_configuration() {
    let series = Series::from_values(start(), &sinusoid(60)).unwrap();
    for config in [
        BacktestConfig::expanding(40, 0),
        BacktestConfig::expanding(40, 2).with_step(0),
        BacktestConfig::expanding(40, 2).with_level(1.0),
    ] {
        let err = Backtester::new(model(1), config).run(&series).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
    }
    assert_eq!(BacktestConfig::default().strategy, WindowStrategy::Expanding);
}
