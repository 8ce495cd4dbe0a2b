//! Forecasts and prediction intervals from a [`FittedModel`].

use super::model::FittedModel;
use crate::core::{ForecastPoint, ForecastResult, Period, Series};
use crate::error::{ForecastError, Result};
use crate::seasonality::SeasonalFeatureSet;
use crate::utils::linalg::{dot, quadratic_form};
use crate::utils::stats::{nb_quantile, quantile_normal};

impl FittedModel {
    /// Forecast the expected count at each target period.
    ///
    /// `features` must hold exactly one feature set per target, for the same
    /// period. When the model has a covariate term, `covariate` must supply
    /// a value at `target - lag` for every target.
    ///
    /// The mean interval reflects coefficient uncertainty only; the
    /// prediction interval combines it with negative binomial dispersion by
    /// taking the lower quantile of the lower mean and the upper quantile of
    /// the upper mean.
    pub fn predict(
        &self,
        targets: &[Period],
        features: &[SeasonalFeatureSet],
        covariate: Option<&Series>,
        level: f64,
    ) -> Result<ForecastResult> {
        if !(level > 0.0 && level < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "confidence level must be in (0, 1), got {level}"
            )));
        }
        if features.len() != targets.len()
            || features
                .iter()
                .zip(targets)
                .any(|(f, &t)| f.period() != t)
        {
            return Err(ForecastError::FeatureHorizonMismatch {
                expected: targets.len(),
                got: features.len(),
            });
        }

        let alpha = 1.0 - level;
        let z = quantile_normal(1.0 - alpha / 2.0);
        let mut points = Vec::with_capacity(targets.len());

        for (&target, feature) in targets.iter().zip(features) {
            let covariate_value = match self.design.covariate() {
                Some((_, lag)) => {
                    let source = target.offset(-(lag as i64));
                    let value = covariate
                        .and_then(|s| s.value(source))
                        .ok_or(ForecastError::MissingCovariate { period: source })?;
                    Some(value)
                }
                None => None,
            };
            let trend = self.first.distance(&target) as f64;
            let row = self.design.row(target, trend, feature.values(), covariate_value)?;

            let eta = dot(&row, &self.coefficients);
            let se = quadratic_form(&self.covariance, &row).max(0.0).sqrt();
            if !eta.is_finite() || se.is_nan() {
                return Err(ForecastError::FitNonconvergent(format!(
                    "non-finite linear predictor at {target}"
                )));
            }
            let mean_lower = positive_exp(eta - z * se);
            let mean_upper = positive_exp(eta + z * se);

            points.push(ForecastPoint {
                period: target,
                mean: positive_exp(eta),
                mean_lower,
                mean_upper,
                lower: nb_quantile(alpha / 2.0, mean_lower, self.theta),
                upper: nb_quantile(1.0 - alpha / 2.0, mean_upper, self.theta),
            });
        }

        Ok(ForecastResult::new(level, points))
    }

    /// Forecast the `horizon` periods after the training window, generating
    /// the seasonal features from the model's own basis.
    pub fn forecast(
        &self,
        horizon: usize,
        covariate: Option<&Series>,
        level: f64,
    ) -> Result<ForecastResult> {
        let targets: Vec<Period> = (1..=horizon).map(|h| self.last.offset(h as i64)).collect();
        let features = self.basis.horizon(self.last, horizon);
        self.predict(&targets, &features, covariate, level)
    }
}

/// Inverse log link, floored at the smallest positive normal float when
/// `exp` underflows. Overflow stays infinite.
fn positive_exp(eta: f64) -> f64 {
    eta.exp().max(f64::MIN_POSITIVE)
}
