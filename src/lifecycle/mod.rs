use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;
use time::{Date, Duration, Month, OffsetDateTime, Time, UtcOffset};

use crate::clock::from_millis;

mod remaining;

pub use remaining::{remaining_time_bucket, RemainingKind, RemainingTime};

pub(crate) const MINUTE_MS: i64 = 60 * 1_000;
pub(crate) const HOUR_MS: i64 = 60 * MINUTE_MS;
pub(crate) const DAY_MS: i64 = 24 * HOUR_MS;
pub(crate) const WEEK_MS: i64 = 7 * DAY_MS;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LifecycleUnit {
    // Aliases accept payloads written by the mobile client, which stored the
    // display label instead of a stable key.
    #[serde(alias = "無期限")]
    Forever,
    #[serde(alias = "当日")]
    Today,
    #[serde(alias = "時間")]
    Hour,
    #[serde(alias = "日")]
    Day,
    #[serde(alias = "週")]
    Week,
    #[serde(alias = "月")]
    Month,
    #[serde(alias = "年")]
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueBounds {
    pub min: u32,
    pub max: u32,
}

impl ValueBounds {
    pub fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }
}

impl LifecycleUnit {
    pub fn is_special(self) -> bool {
        matches!(self, LifecycleUnit::Forever | LifecycleUnit::Today)
    }

    /// Accepted count range for time units. The caps nudge users toward the
    /// next coarser unit instead of large counts.
    pub fn bounds(self) -> Option<ValueBounds> {
        let (min, max) = match self {
            LifecycleUnit::Forever | LifecycleUnit::Today => return None,
            LifecycleUnit::Hour => (1, 23),
            LifecycleUnit::Day => (1, 30),
            LifecycleUnit::Week => (1, 4),
            LifecycleUnit::Month => (1, 11),
            LifecycleUnit::Year => (1, 10),
        };
        Some(ValueBounds { min, max })
    }

    pub fn label(self, count: u32) -> &'static str {
        let plural = count != 1;
        match (self, plural) {
            (LifecycleUnit::Forever, _) => "forever",
            (LifecycleUnit::Today, _) => "today",
            (LifecycleUnit::Hour, false) => "hour",
            (LifecycleUnit::Hour, true) => "hours",
            (LifecycleUnit::Day, false) => "day",
            (LifecycleUnit::Day, true) => "days",
            (LifecycleUnit::Week, false) => "week",
            (LifecycleUnit::Week, true) => "weeks",
            (LifecycleUnit::Month, false) => "month",
            (LifecycleUnit::Month, true) => "months",
            (LifecycleUnit::Year, false) => "year",
            (LifecycleUnit::Year, true) => "years",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lifecycle {
    pub unit: LifecycleUnit,
    pub value: Option<u32>,
}

impl Lifecycle {
    pub const fn forever() -> Self {
        Self {
            unit: LifecycleUnit::Forever,
            value: None,
        }
    }

    pub const fn today() -> Self {
        Self {
            unit: LifecycleUnit::Today,
            value: None,
        }
    }

    pub const fn new(unit: LifecycleUnit, value: Option<u32>) -> Self {
        Self { unit, value }
    }

    pub const fn timed(unit: LifecycleUnit, value: u32) -> Self {
        Self {
            unit,
            value: Some(value),
        }
    }

    pub fn is_valid(&self) -> bool {
        is_valid(self)
    }

    pub fn validate(&self) -> Result<(), LifecycleError> {
        validate(self)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::forever()
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) if !self.unit.is_special() => {
                write!(f, "{value} {}", self.unit.label(value))
            }
            _ => f.write_str(self.unit.label(0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("{unit} lifecycle does not take a value")]
    UnexpectedValue { unit: LifecycleUnit },
    #[error("enter a number between {min} and {max}")]
    OutOfRange {
        unit: LifecycleUnit,
        value: Option<u32>,
        min: u32,
        max: u32,
    },
    #[error("expiry for {lifecycle} falls outside the supported date range")]
    Overflow { lifecycle: Lifecycle },
}

pub fn is_valid(lifecycle: &Lifecycle) -> bool {
    validate(lifecycle).is_ok()
}

pub fn validate(lifecycle: &Lifecycle) -> Result<(), LifecycleError> {
    let unit = lifecycle.unit;
    let Some(bounds) = unit.bounds() else {
        return match lifecycle.value {
            None => Ok(()),
            Some(_) => Err(LifecycleError::UnexpectedValue { unit }),
        };
    };
    match lifecycle.value {
        Some(value) if bounds.contains(value) => Ok(()),
        value => Err(LifecycleError::OutOfRange {
            unit,
            value,
            min: bounds.min,
            max: bounds.max,
        }),
    }
}

pub fn error_message(unit: LifecycleUnit) -> String {
    match unit.bounds() {
        Some(bounds) => format!("enter a number between {} and {}", bounds.min, bounds.max),
        None => String::new(),
    }
}

/// Absolute expiry for a note created at `created_at`, or `None` when the
/// lifecycle never expires.
pub fn compute_expires_at(
    lifecycle: &Lifecycle,
    created_at: i64,
    offset: UtcOffset,
) -> Result<Option<i64>, LifecycleError> {
    validate(lifecycle)?;
    let overflow = || LifecycleError::Overflow {
        lifecycle: *lifecycle,
    };
    let count = i64::from(lifecycle.value.unwrap_or(0));
    let expires_at = match lifecycle.unit {
        LifecycleUnit::Forever => return Ok(None),
        LifecycleUnit::Today => {
            let created = from_millis(created_at, offset).ok_or_else(overflow)?;
            end_of_day(created).ok_or_else(overflow)?
        }
        LifecycleUnit::Hour => add_span(created_at, count, HOUR_MS).ok_or_else(overflow)?,
        LifecycleUnit::Day => add_span(created_at, count, DAY_MS).ok_or_else(overflow)?,
        LifecycleUnit::Week => add_span(created_at, count, WEEK_MS).ok_or_else(overflow)?,
        LifecycleUnit::Month => {
            let created = from_millis(created_at, offset).ok_or_else(overflow)?;
            add_months(created, count).ok_or_else(overflow)?
        }
        LifecycleUnit::Year => {
            let created = from_millis(created_at, offset).ok_or_else(overflow)?;
            add_months(created, count * 12).ok_or_else(overflow)?
        }
    };
    Ok(Some(expires_at))
}

fn add_span(created_at: i64, count: i64, unit_ms: i64) -> Option<i64> {
    count
        .checked_mul(unit_ms)
        .and_then(|span| created_at.checked_add(span))
}

fn end_of_day(at: OffsetDateTime) -> Option<i64> {
    let midnight = at.replace_time(Time::MIDNIGHT);
    let last = midnight.checked_add(Duration::days(1) - Duration::milliseconds(1))?;
    Some(crate::clock::to_millis(last))
}

/// Calendar month addition; the day of month is clamped to the target
/// month's length and the time of day is kept.
fn add_months(at: OffsetDateTime, months: i64) -> Option<i64> {
    let date = at.date();
    let index = i64::from(date.year()) * 12 + i64::from(date.month() as u8) - 1 + months;
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = Month::try_from(u8::try_from(index.rem_euclid(12) + 1).ok()?).ok()?;
    let day = date.day().min(month.length(year));
    let target = Date::from_calendar_date(year, month, day).ok()?;
    Some(crate::clock::to_millis(at.replace_date(target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use time::macros::{datetime, offset};

    fn ms(at: OffsetDateTime) -> i64 {
        crate::clock::to_millis(at)
    }

    #[test]
    fn forever_never_expires() {
        let created = ms(datetime!(2024-03-10 08:15 UTC));
        let expires = compute_expires_at(&Lifecycle::forever(), created, UtcOffset::UTC);
        assert_eq!(expires, Ok(None));
    }

    #[test]
    fn today_expires_at_end_of_local_day() {
        let created = datetime!(2024-03-10 08:15 +09:00);
        let expires =
            compute_expires_at(&Lifecycle::today(), ms(created), offset!(+09:00)).unwrap();
        assert_eq!(expires, Some(ms(datetime!(2024-03-10 23:59:59.999 +09:00))));
    }

    #[test]
    fn today_uses_the_offset_day_not_the_utc_day() {
        // 23:30 UTC on the 9th is already the 10th in Tokyo.
        let created = ms(datetime!(2024-03-09 23:30 UTC));
        let expires = compute_expires_at(&Lifecycle::today(), created, offset!(+09:00)).unwrap();
        assert_eq!(expires, Some(ms(datetime!(2024-03-10 23:59:59.999 +09:00))));
    }

    #[test]
    fn fixed_units_add_exact_durations() {
        let created = ms(datetime!(2024-03-10 08:15 UTC));
        let cases = [
            (Lifecycle::timed(LifecycleUnit::Hour, 3), 3 * HOUR_MS),
            (Lifecycle::timed(LifecycleUnit::Day, 5), 5 * DAY_MS),
            (Lifecycle::timed(LifecycleUnit::Week, 2), 2 * WEEK_MS),
        ];
        for (lifecycle, span) in cases {
            let expires = compute_expires_at(&lifecycle, created, UtcOffset::UTC).unwrap();
            assert_eq!(expires, Some(created + span), "{lifecycle}");
        }
    }

    #[test]
    fn months_clamp_to_shorter_months() {
        let created = ms(datetime!(2024-01-31 10:00 UTC));
        let expires = compute_expires_at(
            &Lifecycle::timed(LifecycleUnit::Month, 1),
            created,
            UtcOffset::UTC,
        )
        .unwrap();
        assert_eq!(expires, Some(ms(datetime!(2024-02-29 10:00 UTC))));
    }

    #[test]
    fn months_roll_over_the_year() {
        let created = ms(datetime!(2023-11-15 06:00 UTC));
        let expires = compute_expires_at(
            &Lifecycle::timed(LifecycleUnit::Month, 3),
            created,
            UtcOffset::UTC,
        )
        .unwrap();
        assert_eq!(expires, Some(ms(datetime!(2024-02-15 06:00 UTC))));
    }

    #[test]
    fn years_from_leap_day_land_on_feb_28() {
        let created = ms(datetime!(2024-02-29 12:00 UTC));
        let expires = compute_expires_at(
            &Lifecycle::timed(LifecycleUnit::Year, 1),
            created,
            UtcOffset::UTC,
        )
        .unwrap();
        assert_eq!(expires, Some(ms(datetime!(2025-02-28 12:00 UTC))));
    }

    #[test]
    fn validation_enforces_nullness_and_bounds() {
        assert!(is_valid(&Lifecycle::forever()));
        assert!(is_valid(&Lifecycle::today()));
        assert!(!is_valid(&Lifecycle::new(LifecycleUnit::Today, Some(1))));
        assert!(is_valid(&Lifecycle::timed(LifecycleUnit::Hour, 23)));
        assert!(!is_valid(&Lifecycle::timed(LifecycleUnit::Hour, 24)));
        assert!(!is_valid(&Lifecycle::timed(LifecycleUnit::Day, 0)));
        assert!(is_valid(&Lifecycle::timed(LifecycleUnit::Day, 30)));
        assert!(!is_valid(&Lifecycle::timed(LifecycleUnit::Month, 12)));
        assert!(is_valid(&Lifecycle::timed(LifecycleUnit::Year, 10)));
        assert!(!is_valid(&Lifecycle::new(LifecycleUnit::Year, None)));
    }

    #[test]
    fn out_of_range_error_names_the_bounds() {
        let err = validate(&Lifecycle::timed(LifecycleUnit::Hour, 30)).unwrap_err();
        assert_matches!(
            err,
            LifecycleError::OutOfRange {
                unit: LifecycleUnit::Hour,
                value: Some(30),
                min: 1,
                max: 23
            }
        );
        let message = err.to_string();
        assert!(message.contains('1') && message.contains("23"), "{message}");
    }

    #[test]
    fn invalid_lifecycle_never_computes_an_expiry() {
        let err = compute_expires_at(
            &Lifecycle::timed(LifecycleUnit::Day, 31),
            0,
            UtcOffset::UTC,
        );
        assert_matches!(err, Err(LifecycleError::OutOfRange { .. }));
    }

    #[test]
    fn error_message_is_empty_for_special_units() {
        assert_eq!(error_message(LifecycleUnit::Forever), "");
        assert_eq!(error_message(LifecycleUnit::Today), "");
        assert_eq!(
            error_message(LifecycleUnit::Month),
            "enter a number between 1 and 11"
        );
    }

    #[test]
    fn units_parse_case_insensitively_and_accept_legacy_labels() {
        assert_eq!("Day".parse::<LifecycleUnit>().unwrap(), LifecycleUnit::Day);
        let legacy: Lifecycle = serde_json::from_str(r#"{"unit":"時間","value":3}"#).unwrap();
        assert_eq!(legacy, Lifecycle::timed(LifecycleUnit::Hour, 3));
        let json = serde_json::to_string(&Lifecycle::forever()).unwrap();
        assert_eq!(json, r#"{"unit":"forever","value":null}"#);
    }

    #[test]
    fn display_reads_naturally() {
        assert_eq!(Lifecycle::timed(LifecycleUnit::Day, 1).to_string(), "1 day");
        assert_eq!(Lifecycle::timed(LifecycleUnit::Week, 3).to_string(), "3 weeks");
        assert_eq!(Lifecycle::today().to_string(), "today");
    }
}
