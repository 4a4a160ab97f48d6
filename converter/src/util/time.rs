use chrono::{DateTime, Datelike, NaiveDateTime, TimeDelta, TimeZone, Utc};

/// Layout Google's auth libraries use for `expiry` in `token.json`.
const EXPIRY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
/// Last year [`EXPIRY_FORMAT`] writes with four digits.
const MAX_EXPIRY_YEAR: i32 = 9999;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Instant `seconds` from now, as reported by a token endpoint's `expires_in`.
///
/// `None` when that instant cannot be written to a token file.
pub fn expires_in(seconds: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(seconds)
        .and_then(|delta| now().checked_add_signed(delta))
        .filter(|expiry| expiry.year() <= MAX_EXPIRY_YEAR)
}

/// Read a stored token expiry.
///
/// Accepts an RFC 3339 timestamp, the same without an offset (taken as UTC,
/// which older token files contain), or whole epoch seconds.
pub fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            let digits = value.len() >= 9 && value.bytes().all(|b| b.is_ascii_digit());
            digits
                .then(|| value.parse::<i64>().ok())
                .flatten()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        })
}

pub fn format_expiry(expiry: &DateTime<Utc>) -> String {
    expiry.format(EXPIRY_FORMAT).to_string()
}
