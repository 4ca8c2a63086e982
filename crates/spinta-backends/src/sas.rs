//! SAS value codecs
//!
//! SAS stores dates as days and datetimes as seconds since 1960-01-01, and
//! times as seconds since midnight. Character columns come back padded
//! with trailing blanks.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

fn epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1960, 1, 1)?.and_hms_opt(0, 0, 0)
}

pub fn sas_date(days: i64) -> Option<NaiveDate> {
    epoch()?.date().checked_add_signed(Duration::try_days(days)?)
}

pub fn sas_datetime(seconds: f64) -> Option<NaiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round() as i64;
    epoch()?.checked_add_signed(Duration::microseconds(micros))
}

pub fn sas_time(seconds: f64) -> Option<NaiveTime> {
    if !seconds.is_finite() || !(0.0..86_400.0).contains(&seconds) {
        return None;
    }
    let whole = seconds.trunc() as u32;
    let nanos = ((seconds - seconds.trunc()) * 1_000_000_000.0).round() as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(whole, nanos.min(999_999_999))
}

pub fn rstrip(value: &str) -> &str {
    value.trim_end_matches(' ')
}
