//! Linear gap imputation for dense count series.

use crate::core::{Period, Series};
use crate::error::{ForecastError, Result};
use tracing::debug;

/// Handling of missing values before the first or after the last observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryPolicy {
    /// Fail with `UninterpolableBoundary`.
    #[default]
    Fail,
    /// Leave boundary values missing.
    LeaveMissing,
}

/// Result of an imputation, keeping the input for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct Imputation {
    /// Series before imputation.
    pub original: Series,
    /// Series with interior gaps filled.
    pub imputed: Series,
    /// Periods whose value was filled in.
    pub filled: Vec<Period>,
}

impl Imputation {
    /// `(period, imputed value)` for every filled period.
    pub fn audit(&self) -> Vec<(Period, f64)> {
        self.filled
            .iter()
            .filter_map(|&p| self.imputed.value(p).map(|v| (p, v)))
            .collect()
    }
}

/// Fills missing values by linear interpolation between the nearest
/// observed neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GapImputer {
    pub boundary: BoundaryPolicy,
}

impl GapImputer {
    pub fn new(boundary: BoundaryPolicy) -> Self {
        Self { boundary }
    }

    pub fn impute(&self, series: &Series) -> Result<Imputation> {
        let values = series.values();
        let n = values.len();
        let observed: Vec<usize> = (0..n).filter(|&i| values[i].is_some()).collect();

        let (first_obs, last_obs) = match (observed.first(), observed.last()) {
            (Some(&a), Some(&b)) => (a, b),
            _ => {
                return match self.boundary {
                    BoundaryPolicy::Fail => Err(ForecastError::UninterpolableBoundary {
                        period: series.start(),
                    }),
                    BoundaryPolicy::LeaveMissing => Ok(Imputation {
                        original: series.clone(),
                        imputed: series.clone(),
                        filled: Vec::new(),
                    }),
                };
            }
        };

        if self.boundary == BoundaryPolicy::Fail {
            if first_obs > 0 {
                return Err(ForecastError::UninterpolableBoundary {
                    period: series.start(),
                });
            }
            if last_obs < n - 1 {
                return Err(ForecastError::UninterpolableBoundary {
                    period: series.period_at(last_obs + 1),
                });
            }
        }

        let mut result = values.to_vec();
        let mut filled = Vec::new();
        for pair in observed.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            if right - left < 2 {
                continue;
            }
            let (l, r) = match (values[left], values[right]) {
                (Some(l), Some(r)) => (l, r),
                _ => continue,
            };
            let segments = (right - left) as f64;
            for idx in (left + 1)..right {
                let t = (idx - left) as f64 / segments;
                result[idx] = Some(l + t * (r - l));
                filled.push(series.period_at(idx));
            }
        }

        if !filled.is_empty() {
            debug!(filled = filled.len(), "interpolated missing periods");
        }

        Ok(Imputation {
            original: series.clone(),
            imputed: Series::new(series.start(), result)?,
            filled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Frequency;
    use approx::assert_relative_eq;

    fn start() -> Period {
        Period::from_ordinal(Frequency::Weekly, 2800)
    }

    #[test]
    fn complete_series_is_unchanged() {
        let s = Series::from_values(start(), &[3.0, 1.0, 4.0, 1.0, 5.0]).unwrap();
        let out = GapImputer::default().impute(&s).unwrap();
        assert_eq!(out.imputed, s);
        assert!(out.filled.is_empty());
    }

    #[test]
    fn single_gap_takes_the_neighbour_mean() {
        let s = Series::new(start(), vec![Some(10.0), None, Some(14.0)]).unwrap();
        let out = GapImputer::default().impute(&s).unwrap();
        assert_relative_eq!(out.imputed.values()[1].unwrap(), 12.0);
        assert_eq!(out.filled, vec![start().succ()]);
        assert_eq!(out.original, s);
        assert_eq!(out.audit(), vec![(start().succ(), 12.0)]);
    }

    #[test]
    fn longer_gaps_are_linear() {
        let s = Series::new(start(), vec![Some(0.0), None, None, None, Some(8.0)]).unwrap();
        let out = GapImputer::default().impute(&s).unwrap();
        let values: Vec<f64> = out.imputed.observed();
        assert_eq!(values, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn boundary_gaps_fail_by_default() {
        let leading = Series::new(start(), vec![None, Some(1.0), Some(2.0)]).unwrap();
        assert_eq!(
            GapImputer::default().impute(&leading),
            Err(ForecastError::UninterpolableBoundary { period: start() })
        );

        let trailing = Series::new(start(), vec![Some(1.0), Some(2.0), None, None]).unwrap();
        assert_eq!(
            GapImputer::default().impute(&trailing),
            Err(ForecastError::UninterpolableBoundary {
                period: start().offset(2)
            })
        );
    }

    #[test]
    fn boundary_gaps_can_be_left_missing() {
        let s = Series::new(start(), vec![None, Some(1.0), None, Some(3.0), None]).unwrap();
        let out = GapImputer::new(BoundaryPolicy::LeaveMissing).impute(&s).unwrap();
        assert_eq!(
            out.imputed.values(),
            &[None, Some(1.0), Some(2.0), Some(3.0), None]
        );
        assert_eq!(out.filled, vec![start().offset(2)]);
    }

    #[test]
    fn all_missing_series() {
        let s = Series::new(start(), vec![None, None]).unwrap();
        assert!(GapImputer::default().impute(&s).is_err());
        let out = GapImputer::new(BoundaryPolicy::LeaveMissing).impute(&s).unwrap();
        assert_eq!(out.imputed, s);
    }
}
