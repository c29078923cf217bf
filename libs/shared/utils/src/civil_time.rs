//! Civil-time normalisation.
//!
//! Every wall-clock reading in the portal is interpreted in one fixed civil
//! zone (UTC+08:00), never in the host's local timezone. This module is the
//! only place that parses `YYYY-MM-DD` / `HH:mm` strings or converts between
//! civil readings and absolute instants.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

/// Offset of the civil calendar from UTC, in seconds.
pub const CIVIL_OFFSET_SECONDS: i32 = 8 * 3600;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CivilTimeError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid time '{0}', expected HH:mm")]
    InvalidTime(String),
}

/// Source of "now". Passed explicitly so every decision is reproducible.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Freezes the clock at a civil wall-clock reading.
    pub fn at_civil(date: NaiveDate, time: NaiveTime) -> Self {
        Self(civil_instant(date, time))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn civil_zone() -> FixedOffset {
    FixedOffset::east_opt(CIVIL_OFFSET_SECONDS)
        .unwrap_or_else(|| unreachable!("civil offset is within one day"))
}

pub fn parse_civil_date(raw: &str) -> Result<NaiveDate, CivilTimeError> {
    let trimmed = raw.trim();
    // chrono accepts unpadded fields; the wire format does not.
    if trimmed.len() != 10 {
        return Err(CivilTimeError::InvalidDate(raw.to_string()));
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .map_err(|_| CivilTimeError::InvalidDate(raw.to_string()))
}

pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, CivilTimeError> {
    let trimmed = raw.trim();
    if trimmed.len() != 5 {
        return Err(CivilTimeError::InvalidTime(raw.to_string()));
    }
    NaiveTime::parse_from_str(trimmed, TIME_FORMAT)
        .map_err(|_| CivilTimeError::InvalidTime(raw.to_string()))
}

/// Absolute instant of `time` on `date` in the civil zone.
pub fn civil_instant(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let local = date.and_time(time);
    // A fixed offset has exactly one mapping for every local reading.
    (local - chrono::Duration::seconds(CIVIL_OFFSET_SECONDS as i64)).and_utc()
}

/// Parses a civil date and optional time-of-day into an instant.
pub fn parse_civil_instant(date: &str, time: Option<&str>) -> Result<DateTime<Utc>, CivilTimeError> {
    let date = parse_civil_date(date)?;
    let time = match time {
        Some(raw) => parse_time_of_day(raw)?,
        None => NaiveTime::default(),
    };
    Ok(civil_instant(date, time))
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    civil_instant(date, NaiveTime::default())
}

/// 23:59:59 civil on `date`.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
    civil_instant(date, last_second)
}

pub fn to_civil(instant: DateTime<Utc>) -> DateTime<FixedOffset> {
    instant.with_timezone(&civil_zone())
}

pub fn now_civil(clock: &dyn Clock) -> DateTime<FixedOffset> {
    to_civil(clock.now())
}

pub fn civil_date_of(instant: DateTime<Utc>) -> NaiveDate {
    to_civil(instant).date_naive()
}

/// 0 = Sunday .. 6 = Saturday, on the civil calendar.
pub fn weekday_of(instant: DateTime<Utc>) -> u32 {
    to_civil(instant).weekday().num_days_from_sunday()
}

pub fn days_until_monday(weekday: u32) -> u32 {
    (1 + 7 - weekday % 7) % 7
}

/// Whole civil days from the civil date of `from` to the civil date of `to`.
pub fn civil_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (civil_date_of(to) - civil_date_of(from)).num_days()
}

pub fn format_time_of_day(instant: DateTime<Utc>) -> String {
    to_civil(instant).format(TIME_FORMAT).to_string()
}

pub fn format_civil_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn civil_nine_am_is_one_am_utc() {
        let instant = civil_instant(date(2025, 3, 3), time(9, 0));
        assert_eq!(instant.to_rfc3339(), "2025-03-03T01:00:00+00:00");
    }

    #[test]
    fn early_civil_morning_falls_on_previous_utc_day() {
        let instant = parse_civil_instant("2025-03-03", Some("07:30")).unwrap();
        assert_eq!(instant.date_naive(), date(2025, 3, 2));
        assert_eq!(instant.hour(), 23);
        assert_eq!(civil_date_of(instant), date(2025, 3, 3));
    }

    #[test]
    fn day_bounds_are_civil() {
        assert_eq!(start_of_day(date(2025, 3, 3)).to_rfc3339(), "2025-03-02T16:00:00+00:00");
        assert_eq!(end_of_day(date(2025, 3, 3)).to_rfc3339(), "2025-03-03T15:59:59+00:00");
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert_eq!(
            parse_civil_date("2025-3-3"),
            Err(CivilTimeError::InvalidDate("2025-3-3".to_string()))
        );
        assert!(parse_civil_date("2025-02-30").is_err());
        assert!(parse_time_of_day("9:00").is_err());
        assert!(parse_time_of_day("24:00").is_err());
        assert!(parse_time_of_day("09:00:00").is_err());
        assert!(parse_civil_instant("03/03/2025", None).is_err());
    }

    #[test]
    fn date_without_time_means_midnight() {
        let instant = parse_civil_instant("2025-03-03", None).unwrap();
        assert_eq!(instant, start_of_day(date(2025, 3, 3)));
    }

    #[test]
    fn weekday_uses_civil_calendar() {
        // 2025-03-02 17:00 UTC is Monday 01:00 in civil time.
        let instant = Utc.with_ymd_and_hms(2025, 3, 2, 17, 0, 0).unwrap();
        assert_eq!(instant.weekday().num_days_from_sunday(), 0);
        assert_eq!(weekday_of(instant), 1);
    }

    #[test]
    fn days_until_monday_wraps() {
        assert_eq!(days_until_monday(0), 1);
        assert_eq!(days_until_monday(1), 0);
        assert_eq!(days_until_monday(2), 6);
        assert_eq!(days_until_monday(6), 2);
    }

    #[test]
    fn civil_day_difference_ignores_time_of_day() {
        let now = civil_instant(date(2025, 3, 3), time(23, 30));
        let target = civil_instant(date(2025, 3, 4), time(0, 15));
        assert_eq!(civil_days_between(now, target), 1);
    }

    #[test]
    fn formats_in_civil_zone() {
        let instant = Utc.with_ymd_and_hms(2025, 3, 3, 2, 15, 0).unwrap();
        assert_eq!(format_time_of_day(instant), "10:15");
        assert_eq!(format_civil_date(date(2025, 3, 3)), "2025-03-03");
    }

    #[test]
    fn fixed_clock_reports_civil_now() {
        let clock = FixedClock::at_civil(date(2025, 3, 3), time(8, 0));
        assert_eq!(now_civil(&clock).hour(), 8);
    }
}
