//! Compact `YYYYMMDD` dates, as used in shard names, artifact paths and
//! the command line.

use chrono::{Days, NaiveDate};

use crate::error::{Result, RollupError};

const COMPACT_FORMAT: &str = "%Y%m%d";

/// Parse a `YYYYMMDD` date.
pub fn parse_compact(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RollupError::Configuration(format!(
            "Invalid date '{}': expected YYYYMMDD",
            raw
        )));
    }
    NaiveDate::parse_from_str(trimmed, COMPACT_FORMAT)
        .map_err(|e| RollupError::Configuration(format!("Invalid date '{}': {}", raw, e)))
}

pub fn format_compact(date: NaiveDate) -> String {
    date.format(COMPACT_FORMAT).to_string()
}

/// `date - days`, failing only at the edge of the representable range.
pub fn days_before(date: NaiveDate, days: u32) -> Result<NaiveDate> {
    date.checked_sub_days(Days::new(u64::from(days))).ok_or_else(|| {
        RollupError::Configuration(format!("{} minus {} days is out of range", date, days))
    })
}
