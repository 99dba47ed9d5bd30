use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SolarDbError};

/// Fixed sampling cadence, stored as whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Frequency {
    seconds: i64,
}

impl Frequency {
    pub const fn from_secs(seconds: i64) -> Self {
        Self { seconds }
    }

    pub const fn seconds(self) -> i64 {
        self.seconds
    }

    pub fn delta(self) -> Duration {
        Duration::seconds(self.seconds)
    }

    /// Number of hours covered by one step.
    pub fn hours(self) -> f64 {
        self.seconds as f64 / 3600.0
    }

    /// Round down onto the frequency grid (anchored at the unix epoch).
    pub fn floor(self, dt: DateTime<Utc>) -> DateTime<Utc> {
        let rem = dt.timestamp().rem_euclid(self.seconds);
        dt - Duration::seconds(rem) - Duration::nanoseconds(i64::from(dt.timestamp_subsec_nanos()))
    }

    /// Round up onto the frequency grid; values already on the grid are kept.
    pub fn ceil(self, dt: DateTime<Utc>) -> DateTime<Utc> {
        let floored = self.floor(dt);
        if floored == dt {
            dt
        } else {
            floored + self.delta()
        }
    }

    /// Half-open grid `[ceil(start), end)`.
    pub fn grid(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let step = self.delta();
        let mut points = Vec::new();
        let mut current = self.ceil(start);
        while current < end {
            points.push(current);
            current += step;
        }
        points
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds % 3600 == 0 {
            write!(f, "{}h", self.seconds / 3600)
        } else if self.seconds % 60 == 0 {
            write!(f, "{}min", self.seconds / 60)
        } else {
            write!(f, "{}s", self.seconds)
        }
    }
}

impl FromStr for Frequency {
    type Err = SolarDbError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (count, unit) = trimmed.split_at(split);
        let invalid = |reason: &str| SolarDbError::InvalidTime {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        let count: i64 = count.parse().map_err(|_| invalid("missing step count"))?;
        let unit_seconds = match unit {
            "s" => 1,
            "min" | "T" => 60,
            "h" | "H" => 3600,
            "d" | "D" => 86_400,
            _ => return Err(invalid("unknown unit, expected s, min, h or d")),
        };
        if count <= 0 {
            return Err(invalid("step must be positive"));
        }
        Ok(Frequency::from_secs(count * unit_seconds))
    }
}

/// Query bound: either an exact instant or a whole calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeBound {
    Date(NaiveDate),
    Instant(DateTime<Utc>),
}

impl TimeBound {
    /// Instant used when this bound opens a range (dates start at 00:00).
    pub fn start_instant(self) -> DateTime<Utc> {
        match self {
            TimeBound::Date(date) => date_earliest(date),
            TimeBound::Instant(dt) => dt,
        }
    }

    /// Instant used when this bound closes an inclusive range (dates end at the last microsecond).
    pub fn end_instant(self) -> DateTime<Utc> {
        match self {
            TimeBound::Date(date) => date_latest(date),
            TimeBound::Instant(dt) => dt,
        }
    }
}

impl From<NaiveDate> for TimeBound {
    fn from(date: NaiveDate) -> Self {
        TimeBound::Date(date)
    }
}

impl From<DateTime<Utc>> for TimeBound {
    fn from(dt: DateTime<Utc>) -> Self {
        TimeBound::Instant(dt)
    }
}

impl From<NaiveDateTime> for TimeBound {
    fn from(dt: NaiveDateTime) -> Self {
        TimeBound::Instant(Utc.from_utc_datetime(&dt))
    }
}

impl FromStr for TimeBound {
    type Err = SolarDbError;

    /// Accepts `YYYY-MM-DD`, `DD.MM.YYYY`, RFC 3339 and `YYYY-MM-DD[ T]HH:MM[:SS]`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        for format in ["%Y-%m-%d", "%d.%m.%Y"] {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                return Ok(TimeBound::Date(date));
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(TimeBound::Instant(dt.with_timezone(&Utc)));
        }
        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(TimeBound::from(dt));
            }
        }
        Err(SolarDbError::InvalidTime {
            input: s.to_string(),
            reason: "expected a date or a date-time".to_string(),
        })
    }
}

pub fn date_earliest(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

pub fn date_latest(date: NaiveDate) -> DateTime<Utc> {
    date_earliest(date) + Duration::days(1) - Duration::microseconds(1)
}

/// Parse an inclusive `start<sep>end` date interval, e.g. `01.01.2021/31.01.2021`.
pub fn parse_date_interval(s: &str, format: &str, sep: char) -> Result<(NaiveDate, NaiveDate)> {
    let invalid = |reason: String| SolarDbError::InvalidTime {
        input: s.to_string(),
        reason,
    };
    let (first, second) = s
        .split_once(sep)
        .ok_or_else(|| invalid(format!("expected two dates separated by '{sep}'")))?;
    let start = NaiveDate::parse_from_str(first.trim(), format)
        .map_err(|e| invalid(format!("bad start date: {e}")))?;
    let end = NaiveDate::parse_from_str(second.trim(), format)
        .map_err(|e| invalid(format!("bad end date: {e}")))?;
    if end < start {
        return Err(invalid("end date precedes start date".to_string()));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PRIMARY_FREQUENCY, SECONDARY_FREQUENCY};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_floor_and_ceil() {
        assert_eq!(SECONDARY_FREQUENCY.floor(at(10, 37, 12)), at(10, 0, 0));
        assert_eq!(SECONDARY_FREQUENCY.ceil(at(10, 37, 12)), at(11, 0, 0));
        assert_eq!(SECONDARY_FREQUENCY.ceil(at(10, 0, 0)), at(10, 0, 0));
        assert_eq!(PRIMARY_FREQUENCY.floor(at(10, 37, 12)), at(10, 35, 0));
    }

    #[test]
    fn test_grid_is_half_open() {
        let grid = PRIMARY_FREQUENCY.grid(at(0, 0, 0), at(1, 0, 0));
        assert_eq!(grid.len(), 12);
        assert_eq!(grid[0], at(0, 0, 0));
        assert_eq!(grid[11], at(0, 55, 0));
    }

    #[test]
    fn test_frequency_strings() {
        assert_eq!(PRIMARY_FREQUENCY.to_string(), "5min");
        assert_eq!(SECONDARY_FREQUENCY.to_string(), "1h");
        assert_eq!("5min".parse::<Frequency>().unwrap(), PRIMARY_FREQUENCY);
        assert_eq!("1h".parse::<Frequency>().unwrap(), SECONDARY_FREQUENCY);
        assert!("five".parse::<Frequency>().is_err());
        assert!((PRIMARY_FREQUENCY.hours() - 5.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_date_bounds_cover_whole_day() {
        let date = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let bound = TimeBound::from(date);
        assert_eq!(bound.start_instant(), at(0, 0, 0));
        assert!(bound.end_instant() > at(23, 59, 59));
        assert!(bound.end_instant() < at(0, 0, 0) + Duration::days(1));
    }

    #[test]
    fn test_parse_time_bounds() {
        assert_eq!(
            "2021-01-01".parse::<TimeBound>().unwrap(),
            TimeBound::Date(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap())
        );
        assert_eq!(
            "2021-01-01 10:30".parse::<TimeBound>().unwrap(),
            TimeBound::Instant(at(10, 30, 0))
        );
        assert!("yesterday".parse::<TimeBound>().is_err());
    }

    #[test]
    fn test_parse_date_interval() {
        let (start, end) = parse_date_interval("01.01.2021/31.01.2021", "%d.%m.%Y", '/').unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2021, 1, 31).unwrap());
        assert!(parse_date_interval("31.01.2021/01.01.2021", "%d.%m.%Y", '/').is_err());
    }
}
