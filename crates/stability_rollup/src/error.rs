//! Error types for the rollup engine.

use chrono::NaiveDate;
use stability_db::BackendError;
use stability_sinks::SinkError;
use thiserror::Error;

use crate::spec::MetricKind;

#[derive(Debug, Error)]
pub enum RollupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Nothing to do: start {start} is after end {end}")]
    EmptyRange { start: NaiveDate, end: NaiveDate },

    #[error("No shards to union for {template}")]
    EmptyWindow { template: String },

    #[error("No data window for {kind} on {date} (cutoff {cutoff})")]
    NoDataWindow {
        kind: MetricKind,
        date: NaiveDate,
        cutoff: NaiveDate,
    },

    #[error("Query failed: {0}")]
    Query(#[from] BackendError),

    #[error("Missing shard {table} for {kind} on {date}")]
    MissingShard {
        table: String,
        kind: MetricKind,
        date: NaiveDate,
    },

    #[error("Artifact write failed: {0}")]
    Write(#[from] SinkError),

    #[error("Row width mismatch for {kind}: header has {expected} columns, row has {actual}")]
    SchemaMismatch {
        kind: MetricKind,
        expected: usize,
        actual: usize,
    },

    #[error("Summarization failed for {date}: {message}")]
    Summarize { date: NaiveDate, message: String },
}

pub type Result<T> = std::result::Result<T, RollupError>;

impl RollupError {
    /// True for the empty-input family: no work existed, nothing failed.
    pub fn is_nothing_to_do(&self) -> bool {
        matches!(
            self,
            RollupError::EmptyRange { .. }
                | RollupError::EmptyWindow { .. }
                | RollupError::NoDataWindow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn nothing_to_do_family() {
        assert!(RollupError::EmptyRange { start: day(2), end: day(1) }.is_nothing_to_do());
        assert!(RollupError::EmptyWindow { template: "main_summary_".into() }.is_nothing_to_do());
        assert!(RollupError::NoDataWindow {
            kind: MetricKind::Counts,
            date: day(5),
            cutoff: day(3),
        }
        .is_nothing_to_do());

        assert!(!RollupError::Configuration("bad".into()).is_nothing_to_do());
        assert!(!RollupError::Summarize { date: day(1), message: "exit 2".into() }.is_nothing_to_do());
    }

    #[test]
    fn messages_name_the_day() {
        let err = RollupError::MissingShard {
            table: "main_summary_20240110".into(),
            kind: MetricKind::Counts,
            date: day(10),
        };
        assert_eq!(
            err.to_string(),
            "Missing shard main_summary_20240110 for main on 2024-01-10"
        );
    }
}
