//! Defensive timestamp parsing.
//!
//! Server payloads are not trusted to carry well-formed dates. Every parser
//! here returns `None` on malformed input instead of failing or producing
//! an out-of-range value.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parses a timestamp string.
///
/// Accepted shapes, in order:
/// - RFC 3339 (`2024-05-01T10:00:00Z`, `2024-05-01T12:00:00+02:00`)
/// - naive date-time without offset, read as UTC (`2024-05-01 10:00:00`)
/// - bare date, read as midnight UTC (`2024-05-01`)
/// - integer milliseconds since the Unix epoch (`1714557600000`)
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
    }

    if input.bytes().all(|b| b.is_ascii_digit()) {
        return input
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis);
    }

    None
}

/// Parses a JSON value holding a timestamp (string or epoch millis number).
pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Formats a timestamp the way it is persisted and sent over the wire.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
