//! ISO-8601 rendering shared by the Tag and JSON codecs (§4.7.1, §4.7.2:
//! "Time/date types serialize as Tag-format ISO strings").
//!
//! Blink beta4 leaves the exact epoch unspecified at the distillation
//! level; this implementation follows the conventional choice used by
//! other Blink codecs: `date`/`millitime`/`nanotime` count from the Unix
//! epoch (1970-01-01T00:00:00Z), `timeOfDayMilli`/`timeOfDayNano` count up
//! from midnight.

use crate::error::{BlinkError, ErrorKind};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

fn parse_error(message: impl Into<String>) -> BlinkError {
    BlinkError::strong(ErrorKind::ValueError, message)
}

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

pub(super) fn format_date(days: i64) -> String {
    let date = epoch().date() + chrono::Duration::days(days);
    date.format("%Y-%m-%d").to_string()
}

pub(super) fn parse_date(s: &str) -> Result<i64, BlinkError> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| parse_error(format!("invalid date '{s}': {e}")))?;
    Ok((date - epoch().date()).num_days())
}

pub(super) fn format_millitime(ms: i64) -> String {
    let dt = epoch() + chrono::Duration::milliseconds(ms);
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub(super) fn parse_millitime(s: &str) -> Result<i64, BlinkError> {
    let dt = parse_rfc3339(s)?;
    let delta = dt - epoch();
    Ok(delta.num_milliseconds())
}

pub(super) fn format_nanotime(ns: i64) -> String {
    let dt = epoch() + chrono::Duration::nanoseconds(ns);
    dt.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string()
}

pub(super) fn parse_nanotime(s: &str) -> Result<i64, BlinkError> {
    let dt = parse_rfc3339(s)?;
    let delta = dt - epoch();
    delta
        .num_nanoseconds()
        .ok_or_else(|| parse_error(format!("nanotime '{s}' out of representable range")))
}

fn parse_rfc3339(s: &str) -> Result<NaiveDateTime, BlinkError> {
    for fmt in ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%SZ"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    Err(parse_error(format!("invalid ISO-8601 timestamp '{s}'")))
}

pub(super) fn format_time_of_day_milli(ms: u32) -> String {
    let t = NaiveTime::from_num_seconds_from_midnight_opt(ms / 1000, (ms % 1000) * 1_000_000).unwrap_or_default();
    t.format("%H:%M:%S%.3f").to_string()
}

pub(super) fn parse_time_of_day_milli(s: &str) -> Result<u32, BlinkError> {
    let t = NaiveTime::parse_from_str(s, "%H:%M:%S%.f").map_err(|e| parse_error(format!("invalid time '{s}': {e}")))?;
    Ok(t.num_seconds_from_midnight() * 1000 + t.nanosecond() / 1_000_000)
}

pub(super) fn format_time_of_day_nano(ns: u64) -> String {
    let secs = (ns / 1_000_000_000) as u32;
    let nanos = (ns % 1_000_000_000) as u32;
    let t = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).unwrap_or_default();
    t.format("%H:%M:%S%.9f").to_string()
}

pub(super) fn parse_time_of_day_nano(s: &str) -> Result<u64, BlinkError> {
    let t = NaiveTime::parse_from_str(s, "%H:%M:%S%.f").map_err(|e| parse_error(format!("invalid time '{s}': {e}")))?;
    Ok(t.num_seconds_from_midnight() as u64 * 1_000_000_000 + t.nanosecond() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_roundtrips() {
        assert_eq!(parse_date(&format_date(0)).unwrap(), 0);
        assert_eq!(parse_date(&format_date(19723)).unwrap(), 19723);
        assert_eq!(format_date(0), "1970-01-01");
    }

    #[test]
    fn millitime_roundtrips() {
        let ms = 1_700_000_000_123;
        assert_eq!(parse_millitime(&format_millitime(ms)).unwrap(), ms);
    }

    #[test]
    fn time_of_day_milli_roundtrips() {
        let ms = 12 * 3_600_000 + 34 * 60_000 + 56_000 + 789;
        assert_eq!(parse_time_of_day_milli(&format_time_of_day_milli(ms)).unwrap(), ms);
    }
}
