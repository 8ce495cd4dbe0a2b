//! Forecasting models.

mod traits;

pub mod negbin;

pub use traits::CountForecaster;
