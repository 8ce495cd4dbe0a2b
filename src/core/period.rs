//! Discrete calendar periods used as the time index of count series.

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc, Weekday};
use std::fmt;

/// Calendar unit a [`Period`] counts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Frequency {
    /// One calendar day.
    Daily,
    /// One ISO week, Monday to Sunday.
    #[default]
    Weekly,
    /// One calendar month.
    Monthly,
}

impl Frequency {
    /// Average number of periods in one calendar year.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            Frequency::Daily => 365.25,
            Frequency::Weekly => 365.25 / 7.0,
            Frequency::Monthly => 12.0,
        }
    }
}

/// A discrete calendar bucket identified by its frequency and an absolute
/// ordinal.
///
/// Ordinals are counted from fixed epochs (1970-01-01 for days, the Monday
/// 1970-01-05 for weeks, year zero for months), so the ordinal is a stable
/// absolute position that does not depend on where a series starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    frequency: Frequency,
    ordinal: i64,
}

fn day_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn week_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 5).unwrap_or(NaiveDate::MIN)
}

impl Period {
    /// Create a period directly from its absolute ordinal.
    pub fn from_ordinal(frequency: Frequency, ordinal: i64) -> Self {
        Self { frequency, ordinal }
    }

    /// The period containing a calendar date.
    pub fn from_date(date: NaiveDate, frequency: Frequency) -> Self {
        let ordinal = match frequency {
            Frequency::Daily => (date - day_epoch()).num_days(),
            Frequency::Weekly => (date - week_epoch()).num_days().div_euclid(7),
            Frequency::Monthly => date.year() as i64 * 12 + date.month0() as i64,
        };
        Self { frequency, ordinal }
    }

    /// The period containing a UTC instant.
    pub fn from_datetime(timestamp: DateTime<Utc>, frequency: Frequency) -> Self {
        Self::from_date(timestamp.date_naive(), frequency)
    }

    /// Parse a textual timestamp and map it onto a period.
    ///
    /// Accepted forms: `2024-03-15`, `2024-03-15T08:00:00Z` (RFC 3339),
    /// `2024-03-15T08:00:00`, `2024-03-15 08:00:00`, `2024-W11`,
    /// `2024-W11-5` and `2024-03`.
    pub fn parse(text: &str, frequency: Frequency) -> Result<Self> {
        parse_date(text.trim())
            .map(|date| Self::from_date(date, frequency))
            .ok_or_else(|| ForecastError::MalformedTimestamp(text.to_string()))
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn ordinal(&self) -> i64 {
        self.ordinal
    }

    /// The period `n` steps away (negative steps go back in time).
    pub fn offset(&self, n: i64) -> Self {
        Self {
            frequency: self.frequency,
            ordinal: self.ordinal + n,
        }
    }

    pub fn succ(&self) -> Self {
        self.offset(1)
    }

    pub fn pred(&self) -> Self {
        self.offset(-1)
    }

    /// Signed number of periods from `self` to `other`.
    ///
    /// Both periods must share a frequency.
    pub fn distance(&self, other: &Period) -> i64 {
        debug_assert_eq!(self.frequency, other.frequency);
        other.ordinal - self.ordinal
    }

    /// First calendar day of the period.
    pub fn start_date(&self) -> Option<NaiveDate> {
        match self.frequency {
            Frequency::Daily => day_epoch().checked_add_signed(Duration::try_days(self.ordinal)?),
            Frequency::Weekly => {
                week_epoch().checked_add_signed(Duration::try_days(self.ordinal.checked_mul(7)?)?)
            }
            Frequency::Monthly => {
                let year = i32::try_from(self.ordinal.div_euclid(12)).ok()?;
                let month = self.ordinal.rem_euclid(12) as u32 + 1;
                NaiveDate::from_ymd_opt(year, month, 1)
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.frequency, self.start_date()) {
            (Frequency::Daily, Some(date)) => write!(f, "{}", date.format("%Y-%m-%d")),
            (Frequency::Weekly, Some(date)) => {
                let week = date.iso_week();
                write!(f, "{}-W{:02}", week.year(), week.week())
            }
            (Frequency::Monthly, Some(date)) => write!(f, "{}", date.format("%Y-%m")),
            (frequency, None) => write!(f, "{:?}#{}", frequency, self.ordinal),
        }
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    if let Some(date) = parse_iso_week(text) {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts.date());
        }
    }
    if text.len() == 7 {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d") {
            return Some(date);
        }
    }
    None
}

/// `YYYY-Www` or `YYYY-Www-D`.
fn parse_iso_week(text: &str) -> Option<NaiveDate> {
    let (year, rest) = text.split_once("-W")?;
    let year: i32 = year.parse().ok()?;
    let (week, day) = match rest.split_once('-') {
        Some((week, day)) => (week, day.parse::<u32>().ok()?),
        None => (rest, 1),
    };
    let week: u32 = week.parse().ok()?;
    let weekday = match day {
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        6 => Weekday::Sat,
        7 => Weekday::Sun,
        _ => return None,
    };
    NaiveDate::from_isoywd_opt(year, week, weekday)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn weekly_periods_start_on_monday() {
        let p = Period::from_date(date(2024, 3, 14), Frequency::Weekly);
        assert_eq!(p.start_date(), Some(date(2024, 3, 11)));
        assert_eq!(p.to_string(), "2024-W11");

        let sunday = Period::from_date(date(2024, 3, 17), Frequency::Weekly);
        assert_eq!(p, sunday);
        let monday = Period::from_date(date(2024, 3, 18), Frequency::Weekly);
        assert_eq!(p.succ(), monday);
    }

    #[test]
    fn weeks_before_epoch_round_down() {
        let p = Period::from_date(date(1970, 1, 4), Frequency::Weekly);
        assert_eq!(p.ordinal(), -1);
        assert_eq!(p.start_date(), Some(date(1969, 12, 29)));
    }

    #[test]
    fn distance_is_consistent_with_calendar_order() {
        let a = Period::from_date(date(2023, 12, 25), Frequency::Weekly);
        let b = Period::from_date(date(2024, 2, 5), Frequency::Weekly);
        assert_eq!(a.distance(&b), 6);
        assert_eq!(b.distance(&a), -6);
        assert!(a < b);
        assert_eq!(a.offset(6), b);
        assert_eq!(b.pred().succ(), b);
    }

    #[test]
    fn monthly_and_daily_periods() {
        let m = Period::from_date(date(2024, 12, 31), Frequency::Monthly);
        assert_eq!(m.to_string(), "2024-12");
        assert_eq!(m.succ().to_string(), "2025-01");
        assert_eq!(m.succ().start_date(), Some(date(2025, 1, 1)));

        let d = Period::from_date(date(2024, 2, 28), Frequency::Daily);
        assert_eq!(d.succ().to_string(), "2024-02-29");
    }

    #[test]
    fn parses_common_timestamp_forms() {
        let expected = Period::from_date(date(2024, 3, 11), Frequency::Weekly);
        for text in [
            "2024-03-13",
            "2024-03-13T08:30:00Z",
            "2024-03-13T08:30:00+02:00",
            "2024-03-13T08:30:00",
            "2024-03-13 08:30:00",
            "2024-W11",
            "2024-W11-7",
            " 2024-03-12 ",
        ] {
            assert_eq!(Period::parse(text, Frequency::Weekly).unwrap(), expected, "{text}");
        }

        let month = Period::parse("2024-03", Frequency::Monthly).unwrap();
        assert_eq!(month.to_string(), "2024-03");
    }

    #[test]
    fn malformed_timestamps_are_rejected() {
        for text in ["", "yesterday", "2024-13-01", "2024-W60", "2024-W10-9", "13/03/2024"] {
            let err = Period::parse(text, Frequency::Weekly).unwrap_err();
            assert_eq!(err, ForecastError::MalformedTimestamp(text.to_string()));
        }
    }

    #[test]
    fn periods_per_year() {
        assert_eq!(Frequency::Monthly.periods_per_year(), 12.0);
        assert!((Frequency::Weekly.periods_per_year() - 52.18).abs() < 0.01);
    }
}
