//! Cell-level formatting rules.
//!
//! Dates, times and timestamps are normalized to ISO-8601; values that fail
//! to parse are emitted as their original text.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::DataType;

/// Formats a raw field value according to its declared type.
pub fn format_field(data_type: DataType, raw: &str) -> String {
    match data_type {
        DataType::Date => format_date(raw),
        DataType::Time => format_time(raw),
        DataType::DateTime => format_datetime(raw),
        DataType::Boolean => format_boolean(raw),
        _ => raw.to_string(),
    }
}

/// Extracts one whitespace-separated geopoint component; missing components
/// become empty cells.
pub fn geo_component(raw: &str, component: usize) -> String {
    raw.split_whitespace().nth(component).unwrap_or("").to_string()
}

/// Canonical timestamp rendering: `yyyy-MM-ddTHH:mm:ss.SSS±hh:mm`.
pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string()
}

/// Parses the timestamp shapes seen in collected submissions.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed);
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN).and_utc().fixed_offset());
    }
    None
}

fn format_date(raw: &str) -> String {
    if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
        return raw.to_string();
    }
    match parse_timestamp(raw) {
        Some(parsed) => parsed.format("%Y-%m-%d").to_string(),
        None => raw.to_string(),
    }
}

fn format_time(raw: &str) -> String {
    for pattern in ["%H:%M:%S%.f", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(raw, pattern) {
            return time.format("%H:%M:%S%.3f").to_string();
        }
    }
    raw.to_string()
}

fn format_datetime(raw: &str) -> String {
    match parse_timestamp(raw) {
        Some(parsed) => format_timestamp(&parsed),
        None => raw.to_string(),
    }
}

fn format_boolean(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    if raw.eq_ignore_ascii_case("true") || raw == "1" {
        "True".to_string()
    } else {
        "False".to_string()
    }
}
