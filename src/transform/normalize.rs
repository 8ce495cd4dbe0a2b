//! Calendar normalization of raw, possibly unordered, count records.
//!
//! Maps raw timestamps onto a fixed period grid, resolves periods that appear
//! more than once, and fills the grid between the first and last period so
//! the result is a dense [`Series`].

use crate::core::{Frequency, Period, Series};
use crate::error::{ForecastError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Timestamp of a raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    /// Textual timestamp, parsed by [`Period::parse`].
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl RawTimestamp {
    pub fn to_period(&self, frequency: Frequency) -> Result<Period> {
        match self {
            RawTimestamp::Text(text) => Period::parse(text, frequency),
            RawTimestamp::Date(date) => Ok(Period::from_date(*date, frequency)),
            RawTimestamp::DateTime(ts) => Ok(Period::from_datetime(*ts, frequency)),
        }
    }
}

impl From<&str> for RawTimestamp {
    fn from(text: &str) -> Self {
        RawTimestamp::Text(text.to_string())
    }
}

impl From<String> for RawTimestamp {
    fn from(text: String) -> Self {
        RawTimestamp::Text(text)
    }
}

impl From<NaiveDate> for RawTimestamp {
    fn from(date: NaiveDate) -> Self {
        RawTimestamp::Date(date)
    }
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(ts: DateTime<Utc>) -> Self {
        RawTimestamp::DateTime(ts)
    }
}

/// One upstream observation: a timestamp, a count and an optional
/// exogenous covariate (e.g. mean temperature).
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub timestamp: RawTimestamp,
    /// `None` marks a count that was explicitly nulled.
    pub count: Option<f64>,
    pub covariate: Option<f64>,
}

impl RawRecord {
    pub fn new(timestamp: impl Into<RawTimestamp>, count: f64) -> Self {
        Self {
            timestamp: timestamp.into(),
            count: Some(count),
            covariate: None,
        }
    }

    /// A record whose count is explicitly missing.
    pub fn nulled(timestamp: impl Into<RawTimestamp>) -> Self {
        Self {
            timestamp: timestamp.into(),
            count: None,
            covariate: None,
        }
    }

    pub fn with_covariate(mut self, value: f64) -> Self {
        self.covariate = Some(value);
        self
    }
}

/// How records falling into the same period are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Add counts together and average covariates (aggregating case-level
    /// or daily records into period totals).
    #[default]
    Sum,
    /// Keep the first record seen for the period.
    First,
    /// Keep the last record seen for the period.
    Last,
}

/// Output of [`CalendarNormalizer::normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSeries {
    /// Dense counts on the period grid.
    pub series: Series,
    /// Dense covariate series, present when any record carried a covariate.
    pub covariate: Option<Series>,
    /// Periods that appeared more than once in the input.
    pub duplicates: Vec<Period>,
    /// Periods inside the grid that no record mapped to.
    pub missing: Vec<Period>,
    /// Periods present in the input whose count was null.
    pub nulled: Vec<Period>,
}

/// Aligns raw records onto a fixed-frequency period grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalendarNormalizer {
    pub frequency: Frequency,
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Default)]
struct Bucket {
    counts: Vec<Option<f64>>,
    covariates: Vec<Option<f64>>,
}

impl CalendarNormalizer {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Normalize records into a dense series.
    pub fn normalize(&self, records: &[RawRecord]) -> Result<NormalizedSeries> {
        if records.is_empty() {
            return Err(ForecastError::EmptyData);
        }

        let mut buckets: BTreeMap<Period, Bucket> = BTreeMap::new();
        for record in records {
            let period = record.timestamp.to_period(self.frequency)?;
            let count = record.count.filter(|c| c.is_finite());
            if let Some(c) = count {
                if c < 0.0 {
                    return Err(ForecastError::InvalidParameter(format!(
                        "negative count {c} for {period}"
                    )));
                }
            }
            let bucket = buckets.entry(period).or_default();
            bucket.counts.push(count);
            bucket.covariates.push(record.covariate.filter(|c| c.is_finite()));
        }

        let (first, last) = match (buckets.keys().next(), buckets.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(ForecastError::EmptyData),
        };

        let duplicates: Vec<Period> = buckets
            .iter()
            .filter(|(_, b)| b.counts.len() > 1)
            .map(|(p, _)| *p)
            .collect();

        let len = first.distance(&last) as usize + 1;
        let mut counts = Vec::with_capacity(len);
        let mut covariates = Vec::with_capacity(len);
        let mut missing = Vec::new();
        let mut nulled = Vec::new();

        for i in 0..len {
            let period = first.offset(i as i64);
            match buckets.get(&period) {
                Some(bucket) => {
                    let count = self.combine_counts(&bucket.counts);
                    if count.is_none() {
                        nulled.push(period);
                    }
                    counts.push(count);
                    covariates.push(self.combine_covariates(&bucket.covariates));
                }
                None => {
                    missing.push(period);
                    counts.push(None);
                    covariates.push(None);
                }
            }
        }

        let covariate = if covariates.iter().any(|c| c.is_some()) {
            Some(Series::new(first, covariates)?)
        } else {
            None
        };

        debug!(
            first = %first,
            last = %last,
            records = records.len(),
            duplicates = duplicates.len(),
            missing = missing.len(),
            nulled = nulled.len(),
            "normalized records onto period grid"
        );

        Ok(NormalizedSeries {
            series: Series::new(first, counts)?,
            covariate,
            duplicates,
            missing,
            nulled,
        })
    }

    fn combine_counts(&self, counts: &[Option<f64>]) -> Option<f64> {
        match self.duplicate_policy {
            DuplicatePolicy::Sum => counts
                .iter()
                .flatten()
                .fold(None, |acc, c| Some(acc.unwrap_or(0.0) + c)),
            DuplicatePolicy::First => counts.first().copied().flatten(),
            DuplicatePolicy::Last => counts.last().copied().flatten(),
        }
    }

    fn combine_covariates(&self, values: &[Option<f64>]) -> Option<f64> {
        match self.duplicate_policy {
            DuplicatePolicy::Sum => {
                let present: Vec<f64> = values.iter().flatten().copied().collect();
                if present.is_empty() {
                    None
                } else {
                    Some(present.iter().sum::<f64>() / present.len() as f64)
                }
            }
            DuplicatePolicy::First => values.first().copied().flatten(),
            DuplicatePolicy::Last => values.last().copied().flatten(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn week(text: &str) -> Period {
        Period::parse(text, Frequency::Weekly).unwrap()
    }

    #[test]
    fn aligns_unordered_records_onto_weeks() {
        let records = vec![
            RawRecord::new("2024-01-17", 4.0),
            RawRecord::new("2024-01-01", 2.0),
            RawRecord::new("2024-01-09", 3.0),
        ];
        let out = CalendarNormalizer::new(Frequency::Weekly)
            .normalize(&records)
            .unwrap();

        assert_eq!(out.series.start(), week("2024-W01"));
        assert_eq!(out.series.values(), &[Some(2.0), Some(3.0), Some(4.0)]);
        assert!(out.duplicates.is_empty());
        assert!(out.missing.is_empty());
        assert!(out.covariate.is_none());
    }

    #[test]
    fn reports_gaps_as_missing() {
        let records = vec![
            RawRecord::new("2024-W01", 2.0),
            RawRecord::new("2024-W04", 5.0),
        ];
        let out = CalendarNormalizer::new(Frequency::Weekly)
            .normalize(&records)
            .unwrap();

        assert_eq!(out.series.len(), 4);
        assert_eq!(out.missing, vec![week("2024-W02"), week("2024-W03")]);
        assert_eq!(out.series.missing_periods(), out.missing);
    }

    #[test]
    fn sums_duplicates_and_reports_them() {
        let records = vec![
            RawRecord::new("2024-01-01", 1.0).with_covariate(10.0),
            RawRecord::new("2024-01-03", 2.0).with_covariate(14.0),
            RawRecord::new("2024-01-08", 5.0),
        ];
        let out = CalendarNormalizer::new(Frequency::Weekly)
            .normalize(&records)
            .unwrap();

        assert_eq!(out.duplicates, vec![week("2024-W01")]);
        assert_eq!(out.series.values(), &[Some(3.0), Some(5.0)]);
        let covariate = out.covariate.unwrap();
        assert_relative_eq!(covariate.values()[0].unwrap(), 12.0);
        assert_eq!(covariate.values()[1], None);
    }

    #[test]
    fn first_and_last_duplicate_policies() {
        let records = vec![
            RawRecord::new("2024-01-01", 1.0),
            RawRecord::new("2024-01-02", 7.0),
        ];
        let first = CalendarNormalizer::new(Frequency::Weekly)
            .with_duplicate_policy(DuplicatePolicy::First)
            .normalize(&records)
            .unwrap();
        let last = CalendarNormalizer::new(Frequency::Weekly)
            .with_duplicate_policy(DuplicatePolicy::Last)
            .normalize(&records)
            .unwrap();
        assert_eq!(first.series.values(), &[Some(1.0)]);
        assert_eq!(last.series.values(), &[Some(7.0)]);
        assert_eq!(first.duplicates.len(), 1);
    }

    #[test]
    fn nulled_counts_are_kept_missing() {
        let records = vec![
            RawRecord::new("2024-W01", 2.0),
            RawRecord::nulled("2024-W02"),
            RawRecord::new("2024-W03", 4.0),
        ];
        let out = CalendarNormalizer::new(Frequency::Weekly)
            .normalize(&records)
            .unwrap();
        assert_eq!(out.nulled, vec![week("2024-W02")]);
        assert!(out.missing.is_empty());
        assert_eq!(out.series.values()[1], None);
    }

    #[test]
    fn accepts_typed_timestamps() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let ts = date.and_hms_opt(12, 0, 0).unwrap().and_utc();
        let records = vec![RawRecord::new(date, 1.0), RawRecord::new(ts, 1.0)];
        let out = CalendarNormalizer::new(Frequency::Weekly)
            .normalize(&records)
            .unwrap();
        assert_eq!(out.series.values(), &[Some(2.0)]);
    }

    #[test]
    fn malformed_timestamp_fails() {
        let records = vec![
            RawRecord::new("2024-01-01", 1.0),
            RawRecord::new("01/08/2024", 1.0),
        ];
        let err = CalendarNormalizer::new(Frequency::Weekly)
            .normalize(&records)
            .unwrap_err();
        assert_eq!(err, ForecastError::MalformedTimestamp("01/08/2024".into()));
    }

    #[test]
    fn rejects_empty_and_negative_input() {
        let normalizer = CalendarNormalizer::new(Frequency::Weekly);
        assert_eq!(normalizer.normalize(&[]), Err(ForecastError::EmptyData));
        assert!(matches!(
            normalizer.normalize(&[RawRecord::new("2024-01-01", -1.0)]),
            Err(ForecastError::InvalidParameter(_))
        ));
    }
}
