//! Negative binomial regression on trend, Fourier seasonality and an
//! optional lagged covariate.

use super::design::{Design, DesignBuilder, Term};
use super::glm::fit_glm;
use crate::core::{Period, Series};
use crate::error::{ForecastError, Result};
use crate::models::CountForecaster;
use crate::seasonality::{FourierBasis, SeasonalFeatureSet};
use tracing::debug;

/// Fitting options for [`NegativeBinomialRegression`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegBinConfig {
    /// Iteration limit for each IRLS stage and for the dispersion loop.
    pub max_iter: usize,
    /// Relative convergence tolerance.
    pub tolerance: f64,
    /// Cap on the dispersion parameter (Poisson limit).
    pub theta_max: f64,
    /// Include a linear time trend.
    pub include_trend: bool,
}

impl Default for NegBinConfig {
    fn default() -> Self {
        Self {
            max_iter: 25,
            tolerance: 1e-8,
            theta_max: 1e6,
            include_trend: true,
        }
    }
}

impl NegBinConfig {
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_theta_max(mut self, theta_max: f64) -> Self {
        self.theta_max = theta_max;
        self
    }

    pub fn with_trend(mut self, include_trend: bool) -> Self {
        self.include_trend = include_trend;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(ForecastError::InvalidParameter(
                "max_iter must be positive".to_string(),
            ));
        }
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "tolerance must be in (0, 1), got {}",
                self.tolerance
            )));
        }
        if !(self.theta_max > 1.0 && self.theta_max.is_finite()) {
            return Err(ForecastError::InvalidParameter(format!(
                "theta_max must be finite and greater than 1, got {}",
                self.theta_max
            )));
        }
        Ok(())
    }
}

/// Exogenous covariate entering the model `lag` periods behind the target.
#[derive(Debug, Clone, PartialEq)]
pub struct Covariate {
    pub name: String,
    pub series: Series,
    pub lag: usize,
}

impl Covariate {
    pub fn new(name: impl Into<String>, series: Series, lag: usize) -> Self {
        Self {
            name: name.into(),
            series,
            lag,
        }
    }

    /// Covariate value used for `target`, i.e. the value at `target - lag`.
    pub fn value_for(&self, target: Period) -> Option<f64> {
        self.series.value(target.offset(-(self.lag as i64)))
    }
}

/// Log-link negative binomial regression with Fourier seasonal terms.
///
/// # Example
/// ```
/// use epicast::core::{Frequency, Period, Series};
/// use epicast::models::negbin::{NegBinConfig, NegativeBinomialRegression};
/// use epicast::seasonality::FourierBasis;
///
/// let start = Period::from_ordinal(Frequency::Weekly, 2800);
/// let values: Vec<f64> = (0..104)
///     .map(|t| (3.0 + 0.5 * (2.0 * std::f64::consts::PI * (2800 + t) as f64 / 52.0).sin()).exp().round())
///     .collect();
/// let series = Series::from_values(start, &values).unwrap();
///
/// let basis = FourierBasis::new(1, 52.0).unwrap();
/// let model = NegativeBinomialRegression::new(basis, NegBinConfig::default());
/// let fitted = model.fit(&series, &basis.historical(&series), None).unwrap();
/// let forecast = fitted.forecast(4, None, 0.95).unwrap();
/// assert_eq!(forecast.horizon(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegativeBinomialRegression {
    basis: FourierBasis,
    config: NegBinConfig,
}

impl NegativeBinomialRegression {
    pub fn new(basis: FourierBasis, config: NegBinConfig) -> Self {
        Self { basis, config }
    }

    pub fn basis(&self) -> FourierBasis {
        self.basis
    }

    pub fn config(&self) -> &NegBinConfig {
        &self.config
    }

    /// Design used for a fit with or without a covariate.
    pub fn design(&self, covariate: Option<&Covariate>) -> Design {
        let mut builder = DesignBuilder::new()
            .with_trend(self.config.include_trend)
            .with_harmonics(self.basis.harmonics());
        if let Some(c) = covariate {
            builder = builder.with_covariate(c.name.clone(), c.lag);
        }
        builder.build()
    }

    /// Fit the model to `series`.
    ///
    /// `features` must hold one feature set per period of the series, in
    /// order. Periods with a missing count, or with no covariate value at
    /// `period - lag`, are dropped from the fit.
    pub fn fit(
        &self,
        series: &Series,
        features: &[SeasonalFeatureSet],
        covariate: Option<&Covariate>,
    ) -> Result<FittedModel> {
        self.config.validate()?;
        if features.len() != series.len()
            || features
                .iter()
                .zip(series.periods())
                .any(|(f, p)| f.period() != p)
        {
            return Err(ForecastError::FeatureHorizonMismatch {
                expected: series.len(),
                got: features.len(),
            });
        }

        let design = self.design(covariate);
        let mut rows = Vec::with_capacity(series.len());
        let mut y = Vec::with_capacity(series.len());
        let mut periods = Vec::with_capacity(series.len());

        for (i, ((period, value), feature)) in series.iter().zip(features).enumerate() {
            let Some(count) = value else { continue };
            let covariate_value = match covariate {
                Some(c) => match c.value_for(period) {
                    Some(v) => Some(v),
                    None => continue,
                },
                None => None,
            };
            rows.push(design.row(period, i as f64, feature.values(), covariate_value)?);
            y.push(count);
            periods.push(period);
        }

        if rows.len() < design.width() {
            return Err(ForecastError::InsufficientData {
                needed: design.width(),
                got: rows.len(),
            });
        }

        let weights = vec![1.0; rows.len()];
        let glm = fit_glm(&rows, &y, &weights, &self.config)?;

        debug!(
            first = %series.start(),
            last = %series.end(),
            observations = rows.len(),
            terms = design.width(),
            theta = glm.theta,
            "fitted negative binomial regression"
        );

        let n_obs = rows.len();
        Ok(FittedModel {
            design,
            coefficients: glm.coefficients,
            covariance: glm.covariance,
            theta: glm.theta,
            first: series.start(),
            last: series.end(),
            basis: self.basis,
            n_obs,
            log_likelihood: glm.log_likelihood,
            deviance: glm.deviance,
            iterations: glm.iterations,
            fitted: periods.into_iter().zip(glm.fitted).collect(),
        })
    }
}

impl CountForecaster for NegativeBinomialRegression {
    fn fit_history(&self, history: &Series, covariate: Option<&Covariate>) -> Result<FittedModel> {
        let features = self.basis.historical(history);
        self.fit(history, &features, covariate)
    }

    fn name(&self) -> &str {
        "NegativeBinomialRegression"
    }
}

/// A fitted regression, immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedModel {
    pub(super) design: Design,
    pub(super) coefficients: Vec<f64>,
    pub(super) covariance: Vec<Vec<f64>>,
    pub(super) theta: f64,
    pub(super) first: Period,
    pub(super) last: Period,
    pub(super) basis: FourierBasis,
    pub(super) n_obs: usize,
    pub(super) log_likelihood: f64,
    pub(super) deviance: f64,
    pub(super) iterations: usize,
    pub(super) fitted: Vec<(Period, f64)>,
}

impl FittedModel {
    pub fn terms(&self) -> &[Term] {
        self.design.terms()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Coefficient of `term`, if the model has it.
    pub fn coefficient(&self, term: &Term) -> Option<f64> {
        self.design.position(term).map(|i| self.coefficients[i])
    }

    /// Coefficient covariance matrix.
    pub fn covariance(&self) -> &[Vec<f64>] {
        &self.covariance
    }

    /// Standard error of `term`'s coefficient.
    pub fn std_error(&self, term: &Term) -> Option<f64> {
        self.design
            .position(term)
            .map(|i| self.covariance[i][i].max(0.0).sqrt())
    }

    /// Dispersion (size) parameter; `theta_max` in the Poisson limit.
    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// First and last period of the training window.
    pub fn training_window(&self) -> (Period, Period) {
        (self.first, self.last)
    }

    pub fn basis(&self) -> FourierBasis {
        self.basis
    }

    /// Observations used in the fit.
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn deviance(&self) -> f64 {
        self.deviance
    }

    /// Akaike information criterion, counting `theta` as a parameter.
    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood + 2.0 * (self.coefficients.len() + 1) as f64
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// In-sample fitted means of the periods used in the fit.
    pub fn fitted(&self) -> &[(Period, f64)] {
        &self.fitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Frequency;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    const START: i64 = 2800;

    fn sinusoid(n: usize) -> Series {
        let values: Vec<f64> = (0..n)
            .map(|t| {
                let angle = 2.0 * PI * (START + t as i64) as f64 / 52.0;
                (3.0 + 0.4 * angle.sin() + 0.2 * angle.cos()).exp()
            })
            .collect();
        Series::from_values(Period::from_ordinal(Frequency::Weekly, START), &values).unwrap()
    }

    fn model(trend: bool) -> NegativeBinomialRegression {
        NegativeBinomialRegression::new(
            FourierBasis::new(1, 52.0).unwrap(),
            NegBinConfig::default().with_trend(trend),
        )
    }

    #[test]
    fn recovers_generator_coefficients() {
        let series = sinusoid(104);
        let m = model(true);
        let fitted = m.fit(&series, &m.basis().historical(&series), None).unwrap();

        assert_relative_eq!(fitted.coefficient(&Term::Intercept).unwrap(), 3.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.coefficient(&Term::Trend).unwrap(), 0.0, epsilon = 1e-7);
        assert_relative_eq!(fitted.coefficient(&Term::Sin(1)).unwrap(), 0.4, epsilon = 1e-6);
        assert_relative_eq!(fitted.coefficient(&Term::Cos(1)).unwrap(), 0.2, epsilon = 1e-6);
        assert_eq!(fitted.theta(), NegBinConfig::default().theta_max);
        assert_eq!(fitted.n_obs(), 104);
        assert_eq!(fitted.training_window(), (series.start(), series.end()));
        assert_eq!(fitted.fitted().len(), 104);
        assert!(fitted.aic().is_finite());
    }

    #[test]
    fn missing_counts_are_dropped() {
        let series = sinusoid(60);
        let masked = series
            .masked(&[series.period_at(3), series.period_at(40)])
            .unwrap();
        let m = model(false);
        let fitted = m.fit(&masked, &m.basis().historical(&masked), None).unwrap();
        assert_eq!(fitted.n_obs(), 58);
    }

    #[test]
    fn too_few_observations() {
        let series = sinusoid(3);
        let m = model(true);
        let err = m.fit(&series, &m.basis().historical(&series), None).unwrap_err();
        assert_eq!(err, ForecastError::InsufficientData { needed: 4, got: 3 });
        assert!(err.is_fold_recoverable());
    }

    #[test]
    fn misaligned_features_are_rejected() {
        let series = sinusoid(20);
        let m = model(true);
        let short = m.basis().features(&series.periods()[..19]);
        assert_eq!(
            m.fit(&series, &short, None),
            Err(ForecastError::FeatureHorizonMismatch { expected: 20, got: 19 })
        );

        let shifted = m.basis().horizon(series.start(), 20);
        assert!(matches!(
            m.fit(&series, &shifted, None),
            Err(ForecastError::FeatureHorizonMismatch { .. })
        ));
    }

    #[test]
    fn lagged_covariate_enters_the_design() {
        let start = Period::from_ordinal(Frequency::Weekly, START);
        let x: Vec<f64> = (0..62).map(|t| ((t * 7) % 11) as f64 / 10.0).collect();
        let covariate = Covariate::new(
            "temperature",
            Series::from_values(start.offset(-2), &x).unwrap(),
            2,
        );
        let y: Vec<f64> = (0..60)
            .map(|t| {
                let angle = 2.0 * PI * (START + t as i64) as f64 / 52.0;
                (2.5 + 0.3 * angle.sin() + 0.5 * x[t]).exp()
            })
            .collect();
        let series = Series::from_values(start, &y).unwrap();

        let m = model(false);
        let fitted = m
            .fit(&series, &m.basis().historical(&series), Some(&covariate))
            .unwrap();
        let term = Term::Covariate {
            name: "temperature".into(),
            lag: 2,
        };
        assert_relative_eq!(fitted.coefficient(&term).unwrap(), 0.5, epsilon = 1e-6);
        assert_eq!(fitted.terms().len(), 4);
    }

    #[test]
    fn invalid_config() {
        assert!(NegBinConfig::default().with_max_iter(0).validate().is_err());
        assert!(NegBinConfig::default().with_tolerance(0.0).validate().is_err());
        assert!(NegBinConfig::default().with_theta_max(f64::INFINITY).validate().is_err());
        assert!(NegBinConfig::default().validate().is_ok());
    }
}
