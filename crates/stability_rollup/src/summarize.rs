//! Post-rollup summarization step.

use chrono::NaiveDate;
use std::process::Command;
use tracing::{debug, info};

use crate::calendar::format_compact;
use crate::error::{Result, RollupError};

/// Runs once per date after every artifact for that date is published.
pub trait Summarizer {
    fn summarize(&self, date: NaiveDate) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSummarizer;

impl Summarizer for NoopSummarizer {
    fn summarize(&self, date: NaiveDate) -> Result<()> {
        debug!(%date, "No summarize command configured");
        Ok(())
    }
}

/// Runs an external program with the date (`YYYYMMDD`) as its last argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSummarizer {
    program: String,
    args: Vec<String>,
}

impl CommandSummarizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `None` when `argv` is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl Summarizer for CommandSummarizer {
    fn summarize(&self, date: NaiveDate) -> Result<()> {
        let day = format_compact(date);
        info!(program = %self.program, %date, "Summarizing");

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&day)
            .status()
            .map_err(|e| RollupError::Summarize {
                date,
                message: format!("failed to run {}: {}", self.program, e),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(RollupError::Summarize {
                date,
                message: format!("{} exited with {}", self.program, status),
            })
        }
    }
}
