//! `stability-rollup`: publish daily stability rollups for a date range.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use stability_db::DbConnection;
use stability_logging::LogConfig;
use stability_rollup::calendar::{days_before, parse_compact};
use stability_rollup::{
    DailyOrchestrator, RangeDriver, RangeRequest, RollupConfig, RollupError, RollupExecutor,
};
use stability_sinks::LocalObjectStore;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "stability-rollup",
    about = "Aggregate daily stability rollups from the telemetry warehouse"
)]
struct Cli {
    /// Dates as YYYYMMDD: none for today, one for a single day, two for an inclusive range
    #[arg(value_name = "YYYYMMDD")]
    dates: Vec<String>,

    /// Warehouse URL (duckdb:<path>); prompted for when absent
    #[arg(short = 'd', long, env = "STABILITY_ROLLUP_DATABASE", hide_env_values = true)]
    database: Option<String>,

    /// Also re-run the latency interval before the start date (default)
    #[arg(long, overrides_with = "no_latency")]
    latency: bool,

    /// Only run the requested dates
    #[arg(long, overrides_with = "latency")]
    no_latency: bool,

    /// Config file (default: ~/.stability_rollup/config.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Last date eligible for processing, YYYYMMDD (default: yesterday)
    #[arg(long, value_name = "YYYYMMDD")]
    cutoff: Option<String>,

    /// Maximum days of late-arriving data
    #[arg(long)]
    latency_interval: Option<u32>,

    /// Local directory backing the object store
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = stability_logging::init_logging(LogConfig {
        app_name: "stability-rollup",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<RollupError>() {
                Some(rollup) if rollup.is_nothing_to_do() => eprintln!("{}", rollup),
                _ => eprintln!("{:?}", err),
            }
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let request = RangeRequest::from_args(&cli.dates)?;

    let mut config = RollupConfig::load_or_default(cli.config.as_deref())?;
    if let Some(interval) = cli.latency_interval {
        config.latency_interval = interval;
    }
    if let Some(root) = cli.output_root {
        config.output_root = root;
    }

    let today = Local::now().date_naive();
    let cutoff = match cli.cutoff.as_deref() {
        Some(raw) => parse_compact(raw)?,
        None => days_before(today, 1)?,
    };
    let ctx = config.run_context(cutoff);

    let url = match cli.database {
        Some(url) => url,
        None => prompt_database_url()?,
    };
    let db = DbConnection::open_from_url_readonly(&url)
        .with_context(|| format!("Failed to open warehouse: {}", redact(&url)))?;

    let store = LocalObjectStore::new(&config.output_root);
    let summarizer = config.summarizer();
    let executor = RollupExecutor::new(&db, &store, &ctx);
    let orchestrator = DailyOrchestrator::new(executor, config.weekly_actives, summarizer.as_ref());

    let (start, end) = request.bounds(today);
    let latency_enabled = cli.latency || !cli.no_latency;
    let report = RangeDriver::new(&orchestrator, &ctx).run(start, end, latency_enabled)?;

    info!(
        root = %store.root().display(),
        days = report.completed.len(),
        skipped = report.skipped.len(),
        "Rollups published"
    );
    Ok(())
}

fn prompt_database_url() -> Result<String> {
    let url = dialoguer::Password::new()
        .with_prompt("Warehouse URL")
        .interact()
        .context("Failed to read warehouse URL")?;
    Ok(url)
}

/// Drop anything after the scheme so paths with embedded credentials stay
/// out of logs.
fn redact(url: &str) -> String {
    match url.split_once(':') {
        Some((scheme, _)) => format!("{}:<redacted>", scheme),
        None => "<redacted>".to_string(),
    }
}
