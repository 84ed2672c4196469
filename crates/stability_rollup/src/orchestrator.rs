//! Per-day sequencing of the rollups.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::executor::{ArtifactReceipt, RollupExecutor};
use crate::spec::{ACTIVES_DAILY, ACTIVES_WEEKLY, COUNTS, CRASHES};
use crate::summarize::Summarizer;

/// When the weekly actives rollup runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeeklyActives {
    #[default]
    Disabled,
    Always,
    OnWeekday(Weekday),
}

impl WeeklyActives {
    pub fn accepts(&self, date: NaiveDate) -> bool {
        match self {
            WeeklyActives::Disabled => false,
            WeeklyActives::Always => true,
            WeeklyActives::OnWeekday(day) => date.weekday() == *day,
        }
    }
}

/// Artifacts published for one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayReport {
    pub date: NaiveDate,
    pub artifacts: Vec<ArtifactReceipt>,
}

/// Processes a single date end to end.
pub trait DayRunner {
    fn run_day(&self, date: NaiveDate) -> Result<DayReport>;
}

pub struct DailyOrchestrator<'a> {
    executor: RollupExecutor<'a>,
    weekly: WeeklyActives,
    summarizer: &'a dyn Summarizer,
}

impl<'a> DailyOrchestrator<'a> {
    pub fn new(
        executor: RollupExecutor<'a>,
        weekly: WeeklyActives,
        summarizer: &'a dyn Summarizer,
    ) -> Self {
        Self {
            executor,
            weekly,
            summarizer,
        }
    }

    /// Counts, daily actives, weekly actives when enabled for `date`,
    /// crashes, then the summarizer. The first failure stops the day.
    pub fn run(&self, date: NaiveDate) -> Result<DayReport> {
        let mut specs = vec![&COUNTS, &ACTIVES_DAILY];
        if self.weekly.accepts(date) {
            specs.push(&ACTIVES_WEEKLY);
        }
        specs.push(&CRASHES);

        let mut artifacts = Vec::with_capacity(specs.len());
        for spec in specs {
            artifacts.push(self.executor.execute(spec, date)?);
        }

        self.summarizer.summarize(date)?;
        info!(%date, artifacts = artifacts.len(), "Day complete");

        Ok(DayReport { date, artifacts })
    }
}

impl DayRunner for DailyOrchestrator<'_> {
    fn run_day(&self, date: NaiveDate) -> Result<DayReport> {
        self.run(date)
    }
}
