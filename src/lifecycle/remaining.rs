use std::fmt;

use super::{DAY_MS, HOUR_MS, MINUTE_MS};

const MONTH_MS: i64 = 30 * DAY_MS;
const YEAR_MS: i64 = 365 * DAY_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingKind {
    Forever,
    Expired,
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

/// Human-scaled time left before a note expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingTime {
    pub kind: RemainingKind,
    /// `None` for [`RemainingKind::Forever`], `Some(0)` once expired.
    pub value: Option<u64>,
}

impl RemainingTime {
    pub fn is_expired(&self) -> bool {
        self.kind == RemainingKind::Expired
    }
}

impl fmt::Display for RemainingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.value.unwrap_or(0);
        let (singular, plural) = match self.kind {
            RemainingKind::Forever => return f.write_str("never expires"),
            RemainingKind::Expired => return f.write_str("expired"),
            RemainingKind::Minutes => ("minute", "minutes"),
            RemainingKind::Hours => ("hour", "hours"),
            RemainingKind::Days => ("day", "days"),
            RemainingKind::Months => ("month", "months"),
            RemainingKind::Years => ("year", "years"),
        };
        let unit = if count == 1 { singular } else { plural };
        write!(f, "{count} {unit} left")
    }
}

const UNITS: [(RemainingKind, i64, u64); 5] = [
    (RemainingKind::Minutes, MINUTE_MS, 60),
    (RemainingKind::Hours, HOUR_MS, 24),
    (RemainingKind::Days, DAY_MS, 30),
    (RemainingKind::Months, MONTH_MS, 12),
    (RemainingKind::Years, YEAR_MS, u64::MAX),
];

/// Picks the coarsest unit that fits the remaining span and rounds up, so a
/// label of "1 minute" never describes a note that is already gone. A count
/// that rounds up to a whole next unit is reported in that unit instead.
pub fn remaining_time_bucket(expires_at: Option<i64>, now: i64) -> RemainingTime {
    let Some(expires_at) = expires_at else {
        return RemainingTime {
            kind: RemainingKind::Forever,
            value: None,
        };
    };
    let remaining = expires_at.saturating_sub(now);
    if remaining <= 0 {
        return RemainingTime {
            kind: RemainingKind::Expired,
            value: Some(0),
        };
    }
    let start = if remaining < HOUR_MS {
        0
    } else if remaining < DAY_MS {
        1
    } else if remaining < MONTH_MS {
        2
    } else if remaining < YEAR_MS {
        3
    } else {
        4
    };
    for (kind, unit_ms, per_next) in &UNITS[start..] {
        let value = ((remaining + unit_ms - 1) / unit_ms) as u64;
        if value < *per_next {
            return RemainingTime {
                kind: *kind,
                value: Some(value),
            };
        }
    }
    RemainingTime {
        kind: RemainingKind::Years,
        value: Some(((remaining + YEAR_MS - 1) / YEAR_MS) as u64),
    }
}
