//! Timestamp helpers.
//!
//! Litani's persisted documents use RFC 3339 UTC timestamps. Kept as a
//! manual implementation (no `chrono`) to match the rest of the
//! dependency stack, which has no existing use for a calendar crate.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as an RFC 3339 UTC string, second precision.
pub fn now_rfc3339() -> String {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format_rfc3339(d.as_secs())
}

/// Seconds elapsed since `start`, as a fractional wall-clock duration.
/// Used for `Timeline` samples, which are keyed on run-relative
/// wall-clock time rather than absolute timestamps.
pub fn elapsed_seconds(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

pub fn format_rfc3339(secs: u64) -> String {
    let mut s = secs;
    let seconds = s % 60;
    s /= 60;
    let minutes = s % 60;
    s /= 60;
    let hours = s % 24;
    s /= 24;

    let mut days = s;
    let mut year = 1970u64;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let leap = is_leap(year);
    let month_days: [u64; 12] = [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut month = 0usize;
    for (i, &d) in month_days.iter().enumerate() {
        if days < d {
            month = i;
            break;
        }
        days -= d;
    }
    let day = days + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month + 1,
        day,
        hours,
        minutes,
        seconds
    )
}

fn is_leap(year: u64) -> bool {
    (year.is_multiple_of(4) && !year.is_multiple_of(100)) || year.is_multiple_of(400)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_epoch() {
        assert_eq!(format_rfc3339(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn rfc3339_known_date() {
        assert_eq!(format_rfc3339(1704067200), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn rfc3339_leap_day() {
        // 2024-02-29T00:00:00Z = 1709164800
        assert_eq!(format_rfc3339(1709164800), "2024-02-29T00:00:00Z");
    }
}
