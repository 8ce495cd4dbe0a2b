//! Core data structures: calendar periods, dense count series and forecasts.

mod forecast;
mod period;
mod series;

pub use forecast::{ForecastPoint, ForecastResult};
pub use period::{Frequency, Period};
pub use series::Series;
