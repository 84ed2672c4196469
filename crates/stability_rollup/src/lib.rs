//! Stability rollups over a sharded, date-partitioned telemetry warehouse.
//!
//! Telemetry for a calendar day keeps arriving for up to `latency_interval`
//! days after the fact, spread across one shard table per submission date.
//! For each target day the engine unions the shards that can hold that day's
//! records, aggregates them into one of four fixed shapes and publishes one
//! gzip-compressed CSV per shape:
//!
//! - `main`: event counters per dimensional key
//! - `active-daily` / `active-weekly`: distinct active clients per key and
//!   number of active days
//! - `crashes`: crash reports per key
//!
//! Reruns replace artifacts whole, so a range can be re-driven after late
//! data lands.

pub mod calendar;
pub mod config;
pub mod context;
pub mod date_window;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod range;
pub mod shard;
pub mod spec;
pub mod summarize;

pub use config::RollupConfig;
pub use context::{MissingShardPolicy, RunContext};
pub use date_window::{DateWindow, WindowPolicy};
pub use error::{Result, RollupError};
pub use executor::{render_field, ArtifactReceipt, RollupExecutor};
pub use orchestrator::{DailyOrchestrator, DayReport, DayRunner, WeeklyActives};
pub use range::{DateRange, RangeDriver, RangeReport, RangeRequest};
pub use shard::{RowFilter, ShardReference, ShardTemplate, ShardUnionBuilder};
pub use spec::{AggregationSpec, MetricKind};
pub use summarize::{CommandSummarizer, NoopSummarizer, Summarizer};
