//! Date windows: which partition dates a rollup for one target date reads.
//!
//! Telemetry for day D keeps arriving for up to `latency_interval` days, and
//! every submission date lands in its own shard. A window is the bounded run
//! of shard dates that can hold records attributable to D, truncated at the
//! run's cutoff so that shards still being written are never read.

use chrono::NaiveDate;

use crate::calendar::days_before;
use crate::error::Result;

/// `anchor, anchor+1, ..., anchor+count-1`, stopping at `cutoff`.
///
/// The window is a plain value: iterating it does not consume it, and two
/// iterations yield the same dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    anchor: NaiveDate,
    count: u32,
    cutoff: NaiveDate,
}

impl DateWindow {
    pub fn generate(anchor: NaiveDate, count: u32, cutoff: NaiveDate) -> Self {
        Self {
            anchor,
            count,
            cutoff,
        }
    }

    pub fn anchor(&self) -> NaiveDate {
        self.anchor
    }

    pub fn cutoff(&self) -> NaiveDate {
        self.cutoff
    }

    /// Number of dates the window yields after truncation.
    pub fn len(&self) -> usize {
        if self.anchor > self.cutoff {
            return 0;
        }
        let available = (self.cutoff - self.anchor).num_days() + 1;
        available.min(i64::from(self.count)) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.iter().last()
    }

    pub fn iter(&self) -> DateWindowIter {
        DateWindowIter {
            next: Some(self.anchor),
            remaining: self.count,
            cutoff: self.cutoff,
        }
    }
}

impl IntoIterator for DateWindow {
    type Item = NaiveDate;
    type IntoIter = DateWindowIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for &DateWindow {
    type Item = NaiveDate;
    type IntoIter = DateWindowIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct DateWindowIter {
    next: Option<NaiveDate>,
    remaining: u32,
    cutoff: NaiveDate,
}

impl Iterator for DateWindowIter {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        if self.remaining == 0 {
            return None;
        }
        let date = self.next.filter(|d| *d <= self.cutoff)?;
        self.remaining -= 1;
        self.next = date.succ_opt();
        Some(date)
    }
}

/// How a rollup places its shard window around the target date.
///
/// Records for an activity date `a` land in shards `a-1` through
/// `a+latency-1`. A policy admits activity dates from `target` alone, or
/// from `span` days ending at `target`; the window holds every shard any
/// admitted date can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Admit the `span` activity dates ending at the target, not only the
    /// target itself.
    pub lookback: bool,
    /// Activity dates admitted beyond the latency interval.
    pub extra_days: u32,
}

impl WindowPolicy {
    /// Shards holding the target date's records.
    pub const DAILY: WindowPolicy = WindowPolicy {
        lookback: false,
        extra_days: 0,
    };

    /// Shards holding any activity in the `latency+1` days ending at the target.
    pub const DAILY_LOOKBACK: WindowPolicy = WindowPolicy {
        lookback: true,
        extra_days: 0,
    };

    /// Like [`WindowPolicy::DAILY_LOOKBACK`], reaching a further week back.
    pub const WEEKLY_LOOKBACK: WindowPolicy = WindowPolicy {
        lookback: true,
        extra_days: 7,
    };

    /// Number of days the lookback admits, ending at the target.
    pub fn span(&self, latency_interval: u32) -> u32 {
        latency_interval + 1 + self.extra_days
    }

    fn activity_days(&self, latency_interval: u32) -> u32 {
        if self.lookback {
            self.span(latency_interval)
        } else {
            1
        }
    }

    pub fn resolve(
        &self,
        target: NaiveDate,
        latency_interval: u32,
        cutoff: NaiveDate,
    ) -> Result<DateWindow> {
        let activity_days = self.activity_days(latency_interval);
        let anchor = days_before(target, activity_days)?;
        Ok(DateWindow::generate(
            anchor,
            activity_days + latency_interval,
            cutoff,
        ))
    }
}
