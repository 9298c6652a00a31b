//! Validation and normalization utilities for harvest records

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

// ============================================================================
// Timestamp Normalization
// ============================================================================

/// Partial timestamp layouts accepted without a zone designator
const NAIVE_DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Normalize a date-only or partial timestamp to a UTC instant
///
/// Input without a zone is read as UTC. Input that already carries an offset
/// is converted to UTC.
pub fn normalize_utc_timestamp(value: &str) -> Result<DateTime<Utc>, &'static str> {
    let value = value.trim();
    if value.is_empty() {
        return Err("Timestamp cannot be empty");
    }

    if let Ok(zoned) = DateTime::parse_from_rfc3339(value) {
        return Ok(zoned.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    NAIVE_DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or("Timestamp must be a date (YYYY-MM-DD) or a date-time (YYYY-MM-DDTHH:MM[:SS])")
}

/// Render a UTC instant the way harvest documents store it
pub fn format_utc_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
