//! Configuration for rollup runs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::context::{MissingShardPolicy, RunContext};
use crate::error::{Result, RollupError};
use crate::orchestrator::WeeklyActives;
use crate::summarize::{CommandSummarizer, NoopSummarizer, Summarizer};

pub const DEFAULT_LATENCY_INTERVAL: u32 = 10;
pub const DEFAULT_BUCKET: &str = "telemetry-public-analysis-2";
pub const DEFAULT_PATH_PREFIX: &str = "stability-rollups";

/// Rollup configuration, read from TOML.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Maximum number of days a record may arrive late
    #[serde(default = "default_latency_interval")]
    pub latency_interval: u32,

    /// Destination bucket for artifacts
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Key prefix inside the bucket
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Local directory backing the object store
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    #[serde(default)]
    pub weekly_actives: WeeklyActives,

    #[serde(default)]
    pub missing_shards: MissingShardPolicy,

    /// Program and arguments run after each day; the date is appended.
    #[serde(default)]
    pub summarize_command: Vec<String>,
}

fn default_latency_interval() -> u32 {
    DEFAULT_LATENCY_INTERVAL
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_path_prefix() -> String {
    DEFAULT_PATH_PREFIX.to_string()
}

fn default_output_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join("objects"))
        .unwrap_or_else(|| PathBuf::from("objects"))
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            latency_interval: default_latency_interval(),
            bucket: default_bucket(),
            path_prefix: default_path_prefix(),
            output_root: default_output_root(),
            weekly_actives: WeeklyActives::default(),
            missing_shards: MissingShardPolicy::default(),
            summarize_command: Vec::new(),
        }
    }
}

impl RollupConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RollupError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| RollupError::Configuration(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `explicit` if given; otherwise the default config file when it
    /// exists; otherwise defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let path = default_config_path();
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn run_context(&self, cutoff: NaiveDate) -> RunContext {
        RunContext::new(cutoff, self.latency_interval)
            .with_bucket(self.bucket.clone())
            .with_path_prefix(self.path_prefix.clone())
            .with_missing_shards(self.missing_shards)
    }

    pub fn summarizer(&self) -> Box<dyn Summarizer> {
        match CommandSummarizer::from_argv(&self.summarize_command) {
            Some(command) => Box::new(command),
            None => Box::new(NoopSummarizer),
        }
    }
}

/// `<home>/config.toml`
pub fn default_config_path() -> PathBuf {
    stability_logging::stability_home().join("config.toml")
}
