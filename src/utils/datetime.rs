// src/utils/datetime.rs

//! W3C Datetime parsing and formatting.
//!
//! Sitemap `<lastmod>` values and harvest datestamps use the restricted
//! ISO 8601 profile from <http://www.w3.org/TR/NOTE-datetime>:
//!
//! ```text
//! YYYY
//! YYYY-MM
//! YYYY-MM-DD
//! YYYY-MM-DDThh:mmTZD
//! YYYY-MM-DDThh:mm:ssTZD
//! YYYY-MM-DDThh:mm:ss.sTZD
//! ```
//!
//! Forms without a time are read as midnight UTC on the first day of the
//! period. Every instant is normalised to UTC.

use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;

use crate::error::{AppError, Result};

static DATE_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}(-\d{2}(-\d{2})?)?$").expect("valid regex"));

static DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2})(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:\d{2})$")
        .expect("valid regex")
});

/// Parse a W3C Datetime value into a UTC instant.
pub fn parse_w3c(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::date_parse(value, "empty value"));
    }

    let mut text = value.to_string();
    if let Some(caps) = DATE_ONLY.captures(value) {
        if caps.get(1).is_none() {
            text.push_str("-01-01");
        } else if caps.get(2).is_none() {
            text.push_str("-01");
        }
        text.push_str("T00:00:00Z");
    }

    let caps = DATE_TIME
        .captures(&text)
        .ok_or_else(|| AppError::date_parse(value, "not a W3C datetime"))?;

    // RFC 3339 requires seconds
    let normalized = match caps.get(2) {
        Some(_) => text.clone(),
        None => format!("{}:00{}", &caps[1], &caps[4]),
    };

    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::date_parse(value, e))
}

/// Format an instant in `Z` notation, with fractional seconds only when set.
pub fn format_w3c(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
