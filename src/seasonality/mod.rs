//! Seasonal feature generation.

mod fourier;

pub use fourier::{FourierBasis, SeasonalFeatureSet};
