//! Runs one rollup for one target date.

use chrono::NaiveDate;
use stability_db::{validate_read_only, BackendError, DbRow, DbValue, QueryExecutor};
use stability_sinks::{CsvArtifactSink, ObjectStore};
use tracing::{debug, info, warn};

use crate::context::{MissingShardPolicy, RunContext};
use crate::error::{Result, RollupError};
use crate::shard::{ShardTemplate, ShardUnionBuilder};
use crate::spec::{AggregationSpec, MetricKind};

/// What one rollup execution published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReceipt {
    pub kind: MetricKind,
    pub date: NaiveDate,
    pub key: String,
    pub uri: String,
    /// Data rows, excluding the header.
    pub rows: u64,
    pub shards_read: usize,
    pub shards_missing: usize,
}

pub struct RollupExecutor<'a> {
    db: &'a dyn QueryExecutor,
    store: &'a dyn ObjectStore,
    ctx: &'a RunContext,
}

impl<'a> RollupExecutor<'a> {
    pub fn new(db: &'a dyn QueryExecutor, store: &'a dyn ObjectStore, ctx: &'a RunContext) -> Self {
        Self { db, store, ctx }
    }

    pub fn context(&self) -> &RunContext {
        self.ctx
    }

    /// Aggregate `target` and publish its artifact, replacing any earlier one.
    ///
    /// Nothing is published unless every row was written. The warehouse
    /// result is read in full before the artifact is opened, so a failed
    /// query leaves the previous artifact in place; rows are then handed to
    /// the sink one at a time and dropped as they are written.
    pub fn execute(&self, spec: &AggregationSpec, target: NaiveDate) -> Result<ArtifactReceipt> {
        let ctx = self.ctx;
        let window = spec
            .window
            .resolve(target, ctx.latency_interval, ctx.cutoff)?;
        let (first, last) = match (window.first(), window.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(RollupError::NoDataWindow {
                    kind: spec.kind,
                    date: target,
                    cutoff: ctx.cutoff,
                })
            }
        };
        debug!(
            kind = %spec.kind,
            %target,
            %first,
            %last,
            shards = window.len(),
            "Resolved date window"
        );

        let template = ShardTemplate::new(spec.template)?;
        let mut present = Vec::with_capacity(window.len());
        let mut missing = 0usize;
        for date in window {
            let shard = template.shard(date);
            if self.db.table_exists(shard.table())? {
                present.push(date);
                continue;
            }
            match ctx.missing_shards {
                MissingShardPolicy::Skip => {
                    warn!(kind = %spec.kind, %target, table = shard.table(), "Shard missing, skipping");
                    missing += 1;
                }
                MissingShardPolicy::Fail => {
                    return Err(RollupError::MissingShard {
                        table: shard.table().to_string(),
                        kind: spec.kind,
                        date: target,
                    });
                }
            }
        }

        let rows = if present.is_empty() {
            warn!(kind = %spec.kind, %target, "No shards present, writing header only");
            Vec::new()
        } else {
            self.query(spec, &template, &present, target)?
        };

        let key = spec.artifact_key(&ctx.path_prefix, target);
        let row_count = rows.len();
        let mut sink = CsvArtifactSink::create(self.store, &ctx.bucket, &key, spec.header)?;
        for row in rows {
            if row.len() != spec.header.len() {
                sink.rollback();
                return Err(RollupError::SchemaMismatch {
                    kind: spec.kind,
                    expected: spec.header.len(),
                    actual: row.len(),
                });
            }
            sink.write_row(row.values().iter().map(render_field))?;
        }
        let published = sink.commit()?;

        info!(
            kind = %spec.kind,
            %target,
            rows = row_count,
            uri = %published.uri,
            "Published rollup"
        );

        Ok(ArtifactReceipt {
            kind: spec.kind,
            date: target,
            key,
            uri: published.uri,
            rows: row_count as u64,
            shards_read: present.len(),
            shards_missing: missing,
        })
    }

    fn query(
        &self,
        spec: &AggregationSpec,
        template: &ShardTemplate,
        dates: &[NaiveDate],
        target: NaiveDate,
    ) -> Result<Vec<DbRow>> {
        let union = ShardUnionBuilder::build(
            template,
            dates.iter().copied(),
            &spec.shard_columns(),
            &spec.row_filter(self.ctx.latency_interval),
        )?;
        let query = spec.final_query(&union);
        validate_read_only(query.sql())
            .map_err(|e| BackendError::InvalidInput(format!("Rejected rollup query: {}", e)))?;

        Ok(self.db.query_named(&query, &spec.params(target))?)
    }
}

/// CSV text for one result cell.
pub fn render_field(value: &DbValue) -> String {
    match value {
        DbValue::Null => String::new(),
        DbValue::Integer(v) => v.to_string(),
        DbValue::Real(v) if v.is_finite() && v.fract() == 0.0 => format!("{:.1}", v),
        DbValue::Real(v) => v.to_string(),
        DbValue::Text(v) | DbValue::Decimal(v) => v.clone(),
        DbValue::Boolean(true) => "True".to_string(),
        DbValue::Boolean(false) => "False".to_string(),
        DbValue::Date(v) => v.format("%Y-%m-%d").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::COUNTS;
    use stability_db::{NamedParams, NamedQuery};
    use stability_sinks::LocalObjectStore;

    /// Warehouse where every shard exists and every query returns `rows`.
    struct Canned {
        rows: Vec<DbRow>,
    }

    impl QueryExecutor for Canned {
        fn query_named(
            &self,
            _query: &NamedQuery,
            _params: &NamedParams,
        ) -> std::result::Result<Vec<DbRow>, BackendError> {
            Ok(self.rows.clone())
        }

        fn table_exists(&self, _table: &str) -> std::result::Result<bool, BackendError> {
            Ok(true)
        }
    }

    #[test]
    fn narrow_row_is_a_schema_mismatch() {
        let db = Canned {
            rows: vec![DbRow::new(
                vec!["buildversion".to_string(), "abortedsessioncount".to_string()],
                vec![DbValue::from("57.0"), DbValue::from(1_i64)],
            )],
        };
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let ctx = RunContext::new(NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(), 0);
        let target = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();

        let err = RollupExecutor::new(&db, &store, &ctx)
            .execute(&COUNTS, target)
            .unwrap_err();

        match err {
            RollupError::SchemaMismatch {
                kind,
                expected,
                actual,
            } => {
                assert_eq!(kind, MetricKind::Counts);
                assert_eq!(expected, COUNTS.header.len());
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        let key = COUNTS.artifact_key(&ctx.path_prefix, target);
        assert!(!store.object_path(&ctx.bucket, &key).exists());
    }

    #[test]
    fn renders_fields() {
        assert_eq!(render_field(&DbValue::Null), "");
        assert_eq!(render_field(&DbValue::Integer(-42)), "-42");
        assert_eq!(render_field(&DbValue::Real(3.0)), "3.0");
        assert_eq!(render_field(&DbValue::Real(2.5)), "2.5");
        assert_eq!(render_field(&DbValue::Text("en-US".into())), "en-US");
        assert_eq!(render_field(&DbValue::Decimal("3.750".into())), "3.750");
        assert_eq!(render_field(&DbValue::Boolean(true)), "True");
        assert_eq!(render_field(&DbValue::Boolean(false)), "False");
        assert_eq!(
            render_field(&DbValue::Date(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap())),
            "2024-01-09"
        );
    }
}
