//! Parser for upstream sample timestamps.
//!
//! The data source emits `"YYYY-MM-DD HH:MM:SS"` in local time; samples are
//! keyed by epoch seconds everywhere else in the pipeline. A plain epoch
//! number is accepted too, for sources that already resolved the timezone.

use chrono::{Local, NaiveDateTime, TimeZone};

/// Error type for timestamp parsing failures.
#[derive(Debug, Clone)]
pub struct TimeParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse time '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for TimeParseError {}

/// Parses a source timestamp into epoch seconds.
///
/// Accepted formats:
/// - `2026-02-07 17:00:00` — local time, the DataSource contract format
/// - `1738944000` — epoch seconds passthrough
pub fn parse_source_time(input: &str) -> Result<i64, TimeParseError> {
    let input = input.trim();

    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        return input.parse::<i64>().map_err(|e| TimeParseError {
            input: input.to_string(),
            message: e.to_string(),
        });
    }

    let ndt =
        NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S").map_err(|_| TimeParseError {
            input: input.to_string(),
            message: "expected 'YYYY-MM-DD HH:MM:SS' or epoch seconds".to_string(),
        })?;

    // DST transitions can make a local time ambiguous or nonexistent;
    // take the earlier interpretation rather than failing the sample.
    Local
        .from_local_datetime(&ndt)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| TimeParseError {
            input: input.to_string(),
            message: "local time does not exist (DST gap)".to_string(),
        })
}
