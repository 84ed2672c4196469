//! Shared fixtures: an in-memory warehouse with summary shards and helpers
//! for reading published artifacts back.

#![allow(dead_code)]

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use stability_db::{DbConnection, DbValue};
use stability_rollup::calendar::format_compact;
use stability_rollup::RunContext;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const BUCKET: &str = "telemetry-public-analysis-2";
pub const PREFIX: &str = "stability-rollups";

const KEY_COLUMNS: &[(&str, &str)] = &[
    ("buildversion", "TEXT"),
    ("buildid", "TEXT"),
    ("buildarchitecture", "TEXT"),
    ("channel", "TEXT"),
    ("os", "TEXT"),
    ("osversion", "TEXT"),
    ("osservicepackmajor", "BIGINT"),
    ("osservicepackminor", "BIGINT"),
    ("locale", "TEXT"),
    ("activeexperimentid", "TEXT"),
    ("activeexperimentbranch", "TEXT"),
    ("country", "TEXT"),
];

const MAIN_EXTRA_COLUMNS: &[(&str, &str)] = &[
    ("clientid", "TEXT"),
    ("subsessiondate", "DATE"),
    ("reason", "TEXT"),
    ("subsessionlength", "BIGINT"),
    ("abortsplugin", "BIGINT"),
    ("abortscontent", "BIGINT"),
    ("abortsgmplugin", "BIGINT"),
    ("crashesdetectedplugin", "BIGINT"),
    ("pluginhangs", "BIGINT"),
    ("crashesdetectedcontent", "BIGINT"),
    ("crashesdetectedgmplugin", "BIGINT"),
    ("crashsubmitattemptmain", "BIGINT"),
    ("crashsubmitattemptcontent", "BIGINT"),
    ("crashsubmitattemptplugin", "BIGINT"),
    ("crashsubmitsuccessmain", "BIGINT"),
    ("crashsubmitsuccesscontent", "BIGINT"),
    ("crashsubmitsuccessplugin", "BIGINT"),
];

const CRASH_EXTRA_COLUMNS: &[(&str, &str)] = &[
    ("crashdate", "DATE"),
    ("hascrashenvironment", "BOOLEAN"),
];

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn context(cutoff: NaiveDate, latency_interval: u32) -> RunContext {
    RunContext::new(cutoff, latency_interval)
        .with_bucket(BUCKET)
        .with_path_prefix(PREFIX)
}

/// Dimensional key values shared by fixture rows.
#[derive(Debug, Clone)]
pub struct Key {
    pub buildversion: &'static str,
    pub buildid: &'static str,
    pub os: &'static str,
    pub locale: &'static str,
}

impl Default for Key {
    fn default() -> Self {
        Self {
            buildversion: "57.0",
            buildid: "20240101000000",
            os: "Windows_NT",
            locale: "en-US",
        }
    }
}

impl Key {
    fn values(&self) -> Vec<DbValue> {
        vec![
            self.buildversion.into(),
            self.buildid.into(),
            "x86-64".into(),
            "release".into(),
            self.os.into(),
            "10.0".into(),
            0_i64.into(),
            0_i64.into(),
            self.locale.into(),
            DbValue::Null,
            DbValue::Null,
            "US".into(),
        ]
    }

    /// The key as rendered in a counts or crashes artifact.
    pub fn rendered(&self) -> Vec<String> {
        [
            self.buildversion,
            self.buildid,
            "x86-64",
            "release",
            self.os,
            "10.0",
            "0",
            "0",
            self.locale,
            "",
            "",
            "US",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// The key without `buildid`, as rendered in an actives artifact.
    pub fn rendered_without_buildid(&self) -> Vec<String> {
        let mut rendered = self.rendered();
        rendered.remove(1);
        rendered
    }
}

/// One main-summary row.
#[derive(Debug, Clone)]
pub struct Session {
    pub client: &'static str,
    pub date: NaiveDate,
    pub reason: &'static str,
    pub length: i64,
    pub aborts_content: i64,
    pub key: Key,
}

impl Session {
    pub fn new(client: &'static str, date: NaiveDate) -> Self {
        Self {
            client,
            date,
            reason: "shutdown",
            length: 60,
            aborts_content: 0,
            key: Key::default(),
        }
    }

    pub fn aborted(mut self) -> Self {
        self.reason = "aborted-session";
        self
    }

    pub fn length(mut self, seconds: i64) -> Self {
        self.length = seconds;
        self
    }

    pub fn aborts_content(mut self, count: i64) -> Self {
        self.aborts_content = count;
        self
    }

    pub fn key(mut self, key: Key) -> Self {
        self.key = key;
        self
    }

    fn values(&self) -> Vec<DbValue> {
        let mut values = self.key.values();
        values.extend([
            DbValue::from(self.client),
            DbValue::from(self.date),
            DbValue::from(self.reason),
            DbValue::from(self.length),
            DbValue::Integer(0),
            DbValue::from(self.aborts_content),
        ]);
        // remaining counters
        values.extend(std::iter::repeat(DbValue::Integer(0)).take(11));
        values
    }
}

/// One crash-summary row.
#[derive(Debug, Clone)]
pub struct Crash {
    pub date: NaiveDate,
    pub has_environment: bool,
    pub key: Key,
}

impl Crash {
    pub fn new(date: NaiveDate, has_environment: bool) -> Self {
        Self {
            date,
            has_environment,
            key: Key::default(),
        }
    }

    fn values(&self) -> Vec<DbValue> {
        let mut values = self.key.values();
        values.push(DbValue::from(self.date));
        values.push(DbValue::from(self.has_environment));
        values
    }
}

/// Warehouse holding `main_summary_*` and `crash_summary_*` shards.
pub struct Warehouse {
    pub conn: DbConnection,
}

impl Warehouse {
    pub fn in_memory() -> Self {
        Self {
            conn: DbConnection::open_duckdb_memory().unwrap(),
        }
    }

    pub fn open(path: &Path) -> Self {
        Self {
            conn: DbConnection::open_duckdb(path).unwrap(),
        }
    }

    /// Create (if needed) the main shard for `shard_date` and add sessions.
    pub fn main_shard(&self, shard_date: NaiveDate, sessions: &[Session]) -> &Self {
        let table = format!("main_summary_{}", format_compact(shard_date));
        let columns = column_list(MAIN_EXTRA_COLUMNS);
        self.create(&table, MAIN_EXTRA_COLUMNS);
        let rows: Vec<Vec<DbValue>> = sessions.iter().map(Session::values).collect();
        self.conn.insert_rows(&table, &columns, &rows).unwrap();
        self
    }

    pub fn crash_shard(&self, shard_date: NaiveDate, crashes: &[Crash]) -> &Self {
        let table = format!("crash_summary_{}", format_compact(shard_date));
        let columns = column_list(CRASH_EXTRA_COLUMNS);
        self.create(&table, CRASH_EXTRA_COLUMNS);
        let rows: Vec<Vec<DbValue>> = crashes.iter().map(Crash::values).collect();
        self.conn.insert_rows(&table, &columns, &rows).unwrap();
        self
    }

    fn create(&self, table: &str, extra: &[(&str, &str)]) {
        let definition = KEY_COLUMNS
            .iter()
            .chain(extra.iter())
            .map(|(name, ty)| format!("{} {}", name, ty))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn
            .execute_batch(&format!("CREATE TABLE IF NOT EXISTS {} ({})", table, definition))
            .unwrap();
    }
}

fn column_list(extra: &[(&'static str, &'static str)]) -> Vec<&'static str> {
    KEY_COLUMNS
        .iter()
        .chain(extra.iter())
        .map(|(name, _)| *name)
        .collect()
}

pub fn artifact_path(root: &Path, key: &str) -> PathBuf {
    key.split('/').fold(root.join(BUCKET), |p, s| p.join(s))
}

/// Decompress an artifact and parse it, header included.
pub fn read_artifact(root: &Path, key: &str) -> Vec<Vec<String>> {
    let file = File::open(artifact_path(root, key)).unwrap();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(GzDecoder::new(file));
    reader
        .records()
        .map(|record| record.unwrap().iter().map(str::to_string).collect())
        .collect()
}

/// Every file under `root`, relative and `/`-separated, sorted.
pub fn published_files(root: &Path) -> Vec<String> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, out);
            } else {
                let relative = path.strip_prefix(root).unwrap();
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                out.push(parts.join("/"));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

pub fn row(parts: &[&[String]], tail: &[&str]) -> Vec<String> {
    let mut row: Vec<String> = parts.iter().flat_map(|p| p.iter().cloned()).collect();
    row.extend(tail.iter().map(|s| s.to_string()));
    row
}
