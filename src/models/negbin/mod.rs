//! Negative binomial count regression.
//!
//! The mean of each period's count is `exp(x'beta)` where `x` holds an
//! intercept, an optional linear trend, `K` Fourier harmonic pairs and an
//! optional lagged covariate. Dispersion is estimated by maximum likelihood.
//!
//! - [`NegativeBinomialRegression`]: model specification and fitting
//! - [`FittedModel`]: fitted coefficients, used for [`FittedModel::predict`]
//! - [`DesignBuilder`]: typed term list shared with the aberration detectors

mod design;
pub(crate) mod glm;
mod model;
mod predict;

pub use design::{Design, DesignBuilder, Term};
pub use model::{Covariate, FittedModel, NegBinConfig, NegativeBinomialRegression};
