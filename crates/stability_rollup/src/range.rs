//! Date-range expansion and the sequential driver over it.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::calendar::{days_before, parse_compact};
use crate::context::RunContext;
use crate::error::{Result, RollupError};
use crate::orchestrator::{DayReport, DayRunner};

pub const USAGE: &str = "usage: stability-rollup [YYYYMMDD-start] [YYYYMMDD-end]";

/// Dates requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    Today,
    Single(NaiveDate),
    Between(NaiveDate, NaiveDate),
}

impl RangeRequest {
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        match args {
            [] => Ok(RangeRequest::Today),
            [day] => Ok(RangeRequest::Single(parse_compact(day.as_ref())?)),
            [start, end] => Ok(RangeRequest::Between(
                parse_compact(start.as_ref())?,
                parse_compact(end.as_ref())?,
            )),
            _ => Err(RollupError::Configuration(format!(
                "expected at most two dates, got {}\n{}",
                args.len(),
                USAGE
            ))),
        }
    }

    /// Requested `(start, end)` before latency and cutoff adjustments.
    pub fn bounds(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match *self {
            RangeRequest::Today => (today, today),
            RangeRequest::Single(day) => (day, day),
            RangeRequest::Between(start, end) => (start, end),
        }
    }
}

/// Inclusive, non-empty range of dates to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Shift `start` back by the latency interval when enabled and clamp
    /// `end` to the cutoff.
    pub fn resolve(
        start: NaiveDate,
        end: NaiveDate,
        ctx: &RunContext,
        latency_enabled: bool,
    ) -> Result<Self> {
        let start = if latency_enabled {
            days_before(start, ctx.latency_interval)?
        } else {
            start
        };
        let end = end.min(ctx.cutoff);
        if start > end {
            return Err(RollupError::EmptyRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn len(&self) -> usize {
        ((self.end - self.start).num_days() + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeReport {
    pub completed: Vec<DayReport>,
    /// Dates with no data window, and why.
    pub skipped: Vec<(NaiveDate, String)>,
}

impl RangeReport {
    pub fn artifact_count(&self) -> usize {
        self.completed.iter().map(|day| day.artifacts.len()).sum()
    }
}

pub struct RangeDriver<'a> {
    runner: &'a dyn DayRunner,
    ctx: &'a RunContext,
}

impl<'a> RangeDriver<'a> {
    pub fn new(runner: &'a dyn DayRunner, ctx: &'a RunContext) -> Self {
        Self { runner, ctx }
    }

    /// Run every date of the resolved range in ascending order.
    ///
    /// A date without a data window is skipped; any other failure stops the
    /// run, leaving earlier dates published.
    pub fn run(&self, start: NaiveDate, end: NaiveDate, latency_enabled: bool) -> Result<RangeReport> {
        let range = DateRange::resolve(start, end, self.ctx, latency_enabled)?;
        info!(
            "Collecting daily stats from {} through {}",
            range.start, range.end
        );

        let mut report = RangeReport::default();
        for date in range.days() {
            info!("Processing: {}", date);
            match self.runner.run_day(date) {
                Ok(day) => report.completed.push(day),
                Err(err @ RollupError::NoDataWindow { .. }) => {
                    warn!(%date, error = %err, "Skipping date");
                    report.skipped.push((date, err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            days = report.completed.len(),
            skipped = report.skipped.len(),
            artifacts = report.artifact_count(),
            "done"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::MetricKind;
    use std::cell::RefCell;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Recorder {
        seen: RefCell<Vec<NaiveDate>>,
        no_window: Option<NaiveDate>,
        fail_on: Option<NaiveDate>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                seen: RefCell::new(Vec::new()),
                no_window: None,
                fail_on: None,
            }
        }
    }

    impl DayRunner for Recorder {
        fn run_day(&self, date: NaiveDate) -> Result<DayReport> {
            self.seen.borrow_mut().push(date);
            if Some(date) == self.no_window {
                return Err(RollupError::NoDataWindow {
                    kind: MetricKind::Counts,
                    date,
                    cutoff: date,
                });
            }
            if Some(date) == self.fail_on {
                return Err(RollupError::Configuration("boom".to_string()));
            }
            Ok(DayReport {
                date,
                artifacts: Vec::new(),
            })
        }
    }

    #[test]
    fn parses_argument_forms() {
        let none: [&str; 0] = [];
        assert_eq!(RangeRequest::from_args(&none).unwrap(), RangeRequest::Today);
        assert_eq!(
            RangeRequest::from_args(&["20240110"]).unwrap(),
            RangeRequest::Single(ymd(2024, 1, 10))
        );
        assert_eq!(
            RangeRequest::from_args(&["20240101", "20240131"]).unwrap(),
            RangeRequest::Between(ymd(2024, 1, 1), ymd(2024, 1, 31))
        );
        assert!(matches!(
            RangeRequest::from_args(&["20240101", "20240102", "20240103"]),
            Err(RollupError::Configuration(msg)) if msg.contains("usage")
        ));
        assert!(RangeRequest::from_args(&["2024-01-01"]).is_err());
    }

    #[test]
    fn bounds_default_to_today() {
        let today = ymd(2024, 3, 5);
        assert_eq!(RangeRequest::Today.bounds(today), (today, today));
        assert_eq!(
            RangeRequest::Single(ymd(2024, 1, 1)).bounds(today),
            (ymd(2024, 1, 1), ymd(2024, 1, 1))
        );
    }

    #[test]
    fn latency_shifts_start_and_cutoff_clamps_end() {
        let ctx = RunContext::new(ymd(2024, 1, 20), 10);

        let range = DateRange::resolve(ymd(2024, 1, 10), ymd(2024, 1, 31), &ctx, true).unwrap();
        assert_eq!(range.start, ymd(2023, 12, 31));
        assert_eq!(range.end, ymd(2024, 1, 20));
        assert_eq!(range.len(), 21);
        assert_eq!(range.days().count(), 21);

        let plain = DateRange::resolve(ymd(2024, 1, 10), ymd(2024, 1, 10), &ctx, false).unwrap();
        assert_eq!(plain.days().collect::<Vec<_>>(), vec![ymd(2024, 1, 10)]);
    }

    #[test]
    fn inverted_range_is_empty() {
        let ctx = RunContext::new(ymd(2024, 3, 1), 10);
        let err = DateRange::resolve(ymd(2024, 2, 1), ymd(2024, 1, 1), &ctx, false).unwrap_err();
        assert!(matches!(err, RollupError::EmptyRange { .. }));
        assert!(err.is_nothing_to_do());
    }

    #[test]
    fn driver_runs_days_in_order() {
        let ctx = RunContext::new(ymd(2024, 1, 20), 2);
        let recorder = Recorder::new();

        let report = RangeDriver::new(&recorder, &ctx)
            .run(ymd(2024, 1, 10), ymd(2024, 1, 11), true)
            .unwrap();

        assert_eq!(
            *recorder.seen.borrow(),
            vec![ymd(2024, 1, 8), ymd(2024, 1, 9), ymd(2024, 1, 10), ymd(2024, 1, 11)]
        );
        assert_eq!(report.completed.len(), 4);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn driver_skips_dates_without_window() {
        let ctx = RunContext::new(ymd(2024, 1, 20), 0);
        let recorder = Recorder {
            no_window: Some(ymd(2024, 1, 11)),
            ..Recorder::new()
        };

        let report = RangeDriver::new(&recorder, &ctx)
            .run(ymd(2024, 1, 10), ymd(2024, 1, 12), false)
            .unwrap();

        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, ymd(2024, 1, 11));
    }

    #[test]
    fn driver_stops_at_first_fatal_error() {
        let ctx = RunContext::new(ymd(2024, 1, 20), 0);
        let recorder = Recorder {
            fail_on: Some(ymd(2024, 1, 11)),
            ..Recorder::new()
        };

        let err = RangeDriver::new(&recorder, &ctx)
            .run(ymd(2024, 1, 10), ymd(2024, 1, 14), false)
            .unwrap_err();

        assert!(matches!(err, RollupError::Configuration(_)));
        assert_eq!(
            *recorder.seen.borrow(),
            vec![ymd(2024, 1, 10), ymd(2024, 1, 11)]
        );
    }
}
