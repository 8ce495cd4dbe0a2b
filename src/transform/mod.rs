//! Preparation of raw counts: calendar alignment and gap imputation.

mod impute;
mod normalize;

pub use impute::{BoundaryPolicy, GapImputer, Imputation};
pub use normalize::{
    CalendarNormalizer, DuplicatePolicy, NormalizedSeries, RawRecord, RawTimestamp,
};
