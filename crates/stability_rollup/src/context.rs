//! Per-invocation run settings.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// What to do when a shard named by a date window does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingShardPolicy {
    /// Leave the shard out of the union and log it.
    #[default]
    Skip,
    /// Abort the rollup with `MissingShard`.
    Fail,
}

/// Everything a run needs that is not part of a rollup's shape.
///
/// Built once per invocation and passed down by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Last date (inclusive) eligible for processing or shard lookup.
    pub cutoff: NaiveDate,
    /// Maximum number of days late a record may arrive.
    pub latency_interval: u32,
    pub bucket: String,
    pub path_prefix: String,
    pub missing_shards: MissingShardPolicy,
}

impl RunContext {
    pub fn new(cutoff: NaiveDate, latency_interval: u32) -> Self {
        Self {
            cutoff,
            latency_interval,
            bucket: crate::config::DEFAULT_BUCKET.to_string(),
            path_prefix: crate::config::DEFAULT_PATH_PREFIX.to_string(),
            missing_shards: MissingShardPolicy::default(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    pub fn with_missing_shards(mut self, policy: MissingShardPolicy) -> Self {
        self.missing_shards = policy;
        self
    }
}
