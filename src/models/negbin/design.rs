//! Typed regression terms and design row assembly.

use crate::core::Period;
use crate::error::{ForecastError, Result};
use std::fmt;

/// One column of the regression design.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Intercept,
    /// Linear time trend, in periods since the start of the training window.
    Trend,
    /// Sine term of the k-th harmonic (1-based).
    Sin(usize),
    /// Cosine term of the k-th harmonic (1-based).
    Cos(usize),
    /// Exogenous covariate observed `lag` periods before the target.
    Covariate { name: String, lag: usize },
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Intercept => write!(f, "intercept"),
            Term::Trend => write!(f, "trend"),
            Term::Sin(k) => write!(f, "sin{k}"),
            Term::Cos(k) => write!(f, "cos{k}"),
            Term::Covariate { name, lag } => write!(f, "{name}[t-{lag}]"),
        }
    }
}

/// Ordered list of terms defining a design matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    terms: Vec<Term>,
}

impl Design {
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.terms.len()
    }

    pub fn position(&self, term: &Term) -> Option<usize> {
        self.terms.iter().position(|t| t == term)
    }

    pub fn has_trend(&self) -> bool {
        self.terms.contains(&Term::Trend)
    }

    /// Name and lag of the covariate term, if any.
    pub fn covariate(&self) -> Option<(&str, usize)> {
        self.terms.iter().find_map(|t| match t {
            Term::Covariate { name, lag } => Some((name.as_str(), *lag)),
            _ => None,
        })
    }

    /// Number of harmonics used by the seasonal terms.
    pub fn harmonics(&self) -> usize {
        self.terms
            .iter()
            .filter(|t| matches!(t, Term::Sin(_)))
            .count()
    }

    /// Assemble the design row for `period`.
    ///
    /// `seasonal` holds `[sin_1, cos_1, ...]` and must cover every harmonic
    /// of the design. `covariate` is required when the design has a
    /// covariate term.
    pub fn row(
        &self,
        period: Period,
        trend: f64,
        seasonal: &[f64],
        covariate: Option<f64>,
    ) -> Result<Vec<f64>> {
        self.terms
            .iter()
            .map(|term| match term {
                Term::Intercept => Ok(1.0),
                Term::Trend => Ok(trend),
                Term::Sin(k) => seasonal_value(seasonal, 2 * (k - 1)),
                Term::Cos(k) => seasonal_value(seasonal, 2 * (k - 1) + 1),
                Term::Covariate { .. } => covariate.ok_or(ForecastError::MissingCovariate { period }),
            })
            .collect()
    }
}

fn seasonal_value(seasonal: &[f64], index: usize) -> Result<f64> {
    seasonal
        .get(index)
        .copied()
        .ok_or(ForecastError::DimensionMismatch {
            expected: index + 1,
            got: seasonal.len(),
        })
}

/// Builder for [`Design`]. Always starts with an intercept.
#[derive(Debug, Clone, Default)]
pub struct DesignBuilder {
    trend: bool,
    harmonics: usize,
    covariate: Option<(String, usize)>,
}

impl DesignBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trend(mut self, trend: bool) -> Self {
        self.trend = trend;
        self
    }

    pub fn with_harmonics(mut self, harmonics: usize) -> Self {
        self.harmonics = harmonics;
        self
    }

    pub fn with_covariate(mut self, name: impl Into<String>, lag: usize) -> Self {
        self.covariate = Some((name.into(), lag));
        self
    }

    pub fn build(self) -> Design {
        let mut terms = vec![Term::Intercept];
        if self.trend {
            terms.push(Term::Trend);
        }
        for k in 1..=self.harmonics {
            terms.push(Term::Sin(k));
            terms.push(Term::Cos(k));
        }
        if let Some((name, lag)) = self.covariate {
            terms.push(Term::Covariate { name, lag });
        }
        Design { terms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Frequency;

    fn period() -> Period {
        Period::from_ordinal(Frequency::Weekly, 2800)
    }

    #[test]
    fn term_order_is_intercept_trend_harmonics_covariate() {
        let design = DesignBuilder::new()
            .with_trend(true)
            .with_harmonics(2)
            .with_covariate("temperature", 2)
            .build();

        let names: Vec<String> = design.terms().iter().map(|t| t.to_string()).collect();
        assert_eq!(
            names,
            vec!["intercept", "trend", "sin1", "cos1", "sin2", "cos2", "temperature[t-2]"]
        );
        assert_eq!(design.width(), 7);
        assert_eq!(design.harmonics(), 2);
        assert_eq!(design.covariate(), Some(("temperature", 2)));
        assert_eq!(design.position(&Term::Cos(1)), Some(3));
    }

    #[test]
    fn row_values_follow_terms() {
        let design = DesignBuilder::new()
            .with_trend(true)
            .with_harmonics(1)
            .with_covariate("x", 1)
            .build();
        let row = design.row(period(), 4.0, &[0.5, -0.5], Some(9.0)).unwrap();
        assert_eq!(row, vec![1.0, 4.0, 0.5, -0.5, 9.0]);
    }

    #[test]
    fn missing_inputs_are_reported() {
        let design = DesignBuilder::new().with_harmonics(2).with_covariate("x", 0).build();
        assert!(matches!(
            design.row(period(), 0.0, &[0.0, 1.0], Some(1.0)),
            Err(ForecastError::DimensionMismatch { .. })
        ));
        assert_eq!(
            design.row(period(), 0.0, &[0.0; 4], None),
            Err(ForecastError::MissingCovariate { period: period() })
        );
    }

    #[test]
    fn intercept_only() {
        let design = DesignBuilder::new().build();
        assert_eq!(design.terms(), &[Term::Intercept]);
        assert!(!design.has_trend());
        assert_eq!(design.row(period(), 3.0, &[], None).unwrap(), vec![1.0]);
    }
}
