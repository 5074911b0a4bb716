//! Time utilities.
//!
//! Message timestamps travel as ISO-8601 strings with millisecond precision
//! and a `Z` suffix (`2024-05-01T12:00:00.000Z`), the format browsers emit
//! for `Date.toISOString()`. They are compared as opaque strings.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Returns the current time as an ISO-8601 wire timestamp.
pub fn now_iso8601() -> String {
    format_iso8601(Utc::now())
}

/// Format a UTC instant as a wire timestamp.
pub fn format_iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Format Unix milliseconds as a wire timestamp.
///
/// Returns `None` if `millis` is outside chrono's representable range.
pub fn millis_to_iso8601(millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(millis).single().map(format_iso8601)
}

/// Parse a wire timestamp into Unix milliseconds.
///
/// Returns `None` for strings that are not RFC 3339.
pub fn parse_iso8601_millis(timestamp: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.timestamp_millis())
}
