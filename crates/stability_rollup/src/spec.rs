//! Declarative rollup shapes.
//!
//! Each [`AggregationSpec`] fixes everything about one rollup except the
//! target date: which shard family it reads, the per-row filter, the window
//! placement, the grouping, the aggregates and the CSV header. The header
//! always has exactly as many columns as the final query projects.

use chrono::{Datelike, NaiveDate};
use stability_db::{NamedParams, NamedQuery};
use std::fmt;

use crate::calendar::format_compact;
use crate::date_window::WindowPolicy;
use crate::shard::{RowFilter, DAY_PARAM};

pub const MAIN_SUMMARY_TEMPLATE: &str = "main_summary_";
pub const CRASH_SUMMARY_TEMPLATE: &str = "crash_summary_";

/// Dimensional key shared by every rollup, in output order.
pub const DIMENSIONS: &[&str] = &[
    "buildversion",
    "buildid",
    "buildarchitecture",
    "channel",
    "os",
    "osversion",
    "osservicepackmajor",
    "osservicepackminor",
    "locale",
    "activeexperimentid",
    "activeexperimentbranch",
    "country",
];

/// The dimensional key without `buildid`, used by the actives rollups.
pub const ACTIVE_DIMENSIONS: &[&str] = &[
    "buildversion",
    "buildarchitecture",
    "channel",
    "os",
    "osversion",
    "osservicepackmajor",
    "osservicepackminor",
    "locale",
    "activeexperimentid",
    "activeexperimentbranch",
    "country",
];

const CRASH_DIMENSIONS: &[&str] = &[
    "buildversion",
    "buildid",
    "buildarchitecture",
    "channel",
    "os",
    "osversion",
    "osservicepackmajor",
    "osservicepackminor",
    "locale",
    "activeexperimentid",
    "activeexperimentbranch",
    "country",
    "hascrashenvironment",
];

const CLIENT_COLUMN: &str = "clientid";
const ABORTED_REASON_PARAM: &str = "aborted_reason";

/// Which rollup an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    Counts,
    ActivesDaily,
    ActivesWeekly,
    Crashes,
}

impl MetricKind {
    /// Suffix used in artifact names.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counts => "main",
            MetricKind::ActivesDaily => "active-daily",
            MetricKind::ActivesWeekly => "active-weekly",
            MetricKind::Crashes => "crashes",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate expression over the union of shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// `SUM(CASE WHEN column = :param THEN 1 ELSE 0 END)`, with `param`
    /// bound to `equals`.
    CountWhere {
        column: &'static str,
        param: &'static str,
        equals: &'static str,
    },
    /// `SUM(column)`
    Sum { column: &'static str },
    /// `COUNT(*)`
    CountRows,
}

impl Aggregate {
    fn input_column(&self) -> Option<&'static str> {
        match self {
            Aggregate::CountWhere { column, .. } | Aggregate::Sum { column } => Some(*column),
            Aggregate::CountRows => None,
        }
    }

    fn push_to(&self, query: &mut NamedQuery) {
        match *self {
            Aggregate::CountWhere { column, param, .. } => {
                query
                    .push_sql("SUM(CASE WHEN ")
                    .push_sql(column)
                    .push_sql(" = ")
                    .push_param(param)
                    .push_sql(" THEN 1 ELSE 0 END)");
            }
            Aggregate::Sum { column } => {
                query.push_sql("SUM(").push_sql(column).push_sql(")");
            }
            Aggregate::CountRows => {
                query.push_sql("COUNT(*)");
            }
        }
    }
}

/// How rows from the union become output rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Group by the key and compute the aggregates.
    Grouped { aggregates: &'static [Aggregate] },
    /// Keep each client's latest activity on the target date, ranked by the
    /// number of distinct active dates in the window, and count clients per
    /// key and rank.
    ActiveClients,
}

/// Per-row filter placement for a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterShape {
    /// Rows whose date column equals the target date.
    OnDay,
    /// Rows dated within the lookback span ending at the target date.
    Lookback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationSpec {
    pub kind: MetricKind,
    pub template: &'static str,
    pub date_column: &'static str,
    pub filter: FilterShape,
    pub window: WindowPolicy,
    pub group_by: &'static [&'static str],
    pub shape: Shape,
    pub header: &'static [&'static str],
}

const COUNTS_AGGREGATES: &[Aggregate] = &[
    Aggregate::CountWhere {
        column: "reason",
        param: ABORTED_REASON_PARAM,
        equals: "aborted-session",
    },
    Aggregate::Sum { column: "subsessionlength" },
    Aggregate::Sum { column: "abortsplugin" },
    Aggregate::Sum { column: "abortscontent" },
    Aggregate::Sum { column: "abortsgmplugin" },
    Aggregate::Sum { column: "crashesdetectedplugin" },
    Aggregate::Sum { column: "pluginhangs" },
    Aggregate::Sum { column: "crashesdetectedcontent" },
    Aggregate::Sum { column: "crashesdetectedgmplugin" },
    Aggregate::Sum { column: "crashsubmitattemptmain" },
    Aggregate::Sum { column: "crashsubmitattemptcontent" },
    Aggregate::Sum { column: "crashsubmitattemptplugin" },
    Aggregate::Sum { column: "crashsubmitsuccessmain" },
    Aggregate::Sum { column: "crashsubmitsuccesscontent" },
    Aggregate::Sum { column: "crashsubmitsuccessplugin" },
];

const COUNTS_HEADER: &[&str] = &[
    "buildversion",
    "buildid",
    "buildarchitecture",
    "channel",
    "os",
    "osversion",
    "osservicepackmajor",
    "osservicepackminor",
    "locale",
    "activeexperimentid",
    "activeexperimentbranch",
    "country",
    "abortedsessioncount",
    "subsessionlengths",
    "abortsplugin",
    "abortscontent",
    "abortsgmplugin",
    "crashesdetectedplugin",
    "pluginhangs",
    "crashesdetectedcontent",
    "crashesdetectedgmplugin",
    "crashsubmitattemptmain",
    "crashsubmitattemptcontent",
    "crashsubmitattemptplugin",
    "crashsubmitsuccessmain",
    "crashsubmitsuccesscontent",
    "crashsubmitsuccessplugin",
];

const CRASHES_HEADER: &[&str] = &[
    "buildversion",
    "buildid",
    "buildarchitecture",
    "channel",
    "os",
    "osversion",
    "osservicepackmajor",
    "osservicepackminor",
    "locale",
    "activeexperimentid",
    "activeexperimentbranch",
    "country",
    "hascrashenvironment",
    "crashes",
];

const ACTIVES_HEADER: &[&str] = &[
    "buildversion",
    "buildarchitecture",
    "channel",
    "os",
    "osversion",
    "osservicepackmajor",
    "osservicepackminor",
    "locale",
    "activeexperimentid",
    "activeexperimentbranch",
    "country",
    "active_days",
    "active_users",
];

/// Event counters per key for sessions on the target date.
pub const COUNTS: AggregationSpec = AggregationSpec {
    kind: MetricKind::Counts,
    template: MAIN_SUMMARY_TEMPLATE,
    date_column: "subsessiondate",
    filter: FilterShape::OnDay,
    window: WindowPolicy::DAILY,
    group_by: DIMENSIONS,
    shape: Shape::Grouped {
        aggregates: COUNTS_AGGREGATES,
    },
    header: COUNTS_HEADER,
};

/// Crash reports per key on the target date.
pub const CRASHES: AggregationSpec = AggregationSpec {
    kind: MetricKind::Crashes,
    template: CRASH_SUMMARY_TEMPLATE,
    date_column: "crashdate",
    filter: FilterShape::OnDay,
    window: WindowPolicy::DAILY,
    group_by: CRASH_DIMENSIONS,
    shape: Shape::Grouped {
        aggregates: &[Aggregate::CountRows],
    },
    header: CRASHES_HEADER,
};

pub const ACTIVES_DAILY: AggregationSpec = AggregationSpec {
    kind: MetricKind::ActivesDaily,
    template: MAIN_SUMMARY_TEMPLATE,
    date_column: "subsessiondate",
    filter: FilterShape::Lookback,
    window: WindowPolicy::DAILY_LOOKBACK,
    group_by: ACTIVE_DIMENSIONS,
    shape: Shape::ActiveClients,
    header: ACTIVES_HEADER,
};

pub const ACTIVES_WEEKLY: AggregationSpec = AggregationSpec {
    kind: MetricKind::ActivesWeekly,
    template: MAIN_SUMMARY_TEMPLATE,
    date_column: "subsessiondate",
    filter: FilterShape::Lookback,
    window: WindowPolicy::WEEKLY_LOOKBACK,
    group_by: ACTIVE_DIMENSIONS,
    shape: Shape::ActiveClients,
    header: ACTIVES_HEADER,
};

pub const ALL_SPECS: &[&AggregationSpec] = &[&COUNTS, &ACTIVES_DAILY, &ACTIVES_WEEKLY, &CRASHES];

impl AggregationSpec {
    pub fn for_kind(kind: MetricKind) -> &'static AggregationSpec {
        match kind {
            MetricKind::Counts => &COUNTS,
            MetricKind::ActivesDaily => &ACTIVES_DAILY,
            MetricKind::ActivesWeekly => &ACTIVES_WEEKLY,
            MetricKind::Crashes => &CRASHES,
        }
    }

    pub fn row_filter(&self, latency_interval: u32) -> RowFilter {
        match self.filter {
            FilterShape::OnDay => RowFilter::OnDay {
                column: self.date_column,
            },
            FilterShape::Lookback => RowFilter::Lookback {
                column: self.date_column,
                span: self.window.span(latency_interval),
            },
        }
    }

    /// Columns each shard sub-select must project.
    pub fn shard_columns(&self) -> Vec<&'static str> {
        let mut columns: Vec<&'static str> = self.group_by.to_vec();
        let extra: Vec<&'static str> = match self.shape {
            Shape::Grouped { aggregates } => {
                aggregates.iter().filter_map(Aggregate::input_column).collect()
            }
            Shape::ActiveClients => vec![CLIENT_COLUMN, self.date_column],
        };
        for column in extra {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    /// Number of columns the final query projects.
    pub fn projected_width(&self) -> usize {
        match self.shape {
            Shape::Grouped { aggregates } => self.group_by.len() + aggregates.len(),
            Shape::ActiveClients => self.group_by.len() + 2,
        }
    }

    /// Wrap the shard union in this spec's aggregation.
    ///
    /// Output rows are ordered by the grouping columns so that reruns over
    /// identical data produce identical artifacts.
    pub fn final_query(&self, union: &NamedQuery) -> NamedQuery {
        let keys = self.group_by.join(", ");
        let mut query = NamedQuery::new();
        match self.shape {
            Shape::Grouped { aggregates } => {
                query.push_sql("SELECT ").push_sql(&keys);
                for aggregate in aggregates {
                    query.push_sql(", ");
                    aggregate.push_to(&mut query);
                }
                query
                    .push_sql("\nFROM (\n")
                    .push_query(union)
                    .push_sql("\n) AS shards\nGROUP BY ")
                    .push_sql(&keys)
                    .push_sql("\nORDER BY ")
                    .push_sql(&keys);
            }
            Shape::ActiveClients => {
                let date = self.date_column;
                query
                    .push_sql("SELECT ")
                    .push_sql(&keys)
                    .push_sql(", activedays, COUNT(*)\nFROM (\nSELECT ")
                    .push_sql(&keys)
                    .push_sql(", ")
                    .push_sql(date)
                    .push_sql(&format!(
                        ",\nDENSE_RANK() OVER (PARTITION BY {client} ORDER BY {date} ASC) AS activedays,\n\
                         ROW_NUMBER() OVER (PARTITION BY {client} ORDER BY {date} DESC) AS rownumber\n",
                        client = CLIENT_COLUMN,
                        date = date
                    ))
                    .push_sql("FROM (\n")
                    .push_query(union)
                    .push_sql("\n) AS shards\n) AS ranked\nWHERE rownumber = 1 AND ")
                    .push_sql(date)
                    .push_sql(" = ")
                    .push_param(DAY_PARAM)
                    .push_sql("\nGROUP BY ")
                    .push_sql(&keys)
                    .push_sql(", activedays\nORDER BY ")
                    .push_sql(&keys)
                    .push_sql(", activedays");
            }
        }
        query
    }

    /// Values for every named parameter the final query uses.
    pub fn params(&self, target: NaiveDate) -> NamedParams {
        let mut params = NamedParams::new().with(DAY_PARAM, target);
        if let Shape::Grouped { aggregates } = self.shape {
            for aggregate in aggregates {
                if let Aggregate::CountWhere { param, equals, .. } = aggregate {
                    params.insert(param, *equals);
                }
            }
        }
        params
    }

    pub fn artifact_key(&self, path_prefix: &str, target: NaiveDate) -> String {
        artifact_key(path_prefix, self.kind, target)
    }
}

/// `{prefix}/{year}/{YYYYMMDD}-{kind}.csv.gz`
pub fn artifact_key(path_prefix: &str, kind: MetricKind, target: NaiveDate) -> String {
    format!(
        "{}/{}/{}-{}.csv.gz",
        path_prefix.trim_end_matches('/'),
        target.year(),
        format_compact(target),
        kind
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::{ShardTemplate, ShardUnionBuilder};
    use stability_db::validate_read_only;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn header_matches_projection_for_every_spec() {
        for spec in ALL_SPECS {
            assert_eq!(
                spec.header.len(),
                spec.projected_width(),
                "header/projection mismatch for {}",
                spec.kind
            );
        }
        assert_eq!(COUNTS.header.len(), 27);
        assert_eq!(CRASHES.header.len(), 14);
        assert_eq!(ACTIVES_DAILY.header.len(), 13);
        assert_eq!(ACTIVES_WEEKLY.header.len(), 13);
    }

    #[test]
    fn header_begins_with_grouping_columns() {
        for spec in ALL_SPECS {
            assert_eq!(&spec.header[..spec.group_by.len()], spec.group_by);
        }
        assert!(!ACTIVES_DAILY.header.contains(&"buildid"));
    }

    #[test]
    fn artifact_keys() {
        let day = ymd(2024, 1, 10);
        assert_eq!(
            COUNTS.artifact_key("stability-rollups", day),
            "stability-rollups/2024/20240110-main.csv.gz"
        );
        assert_eq!(
            ACTIVES_DAILY.artifact_key("stability-rollups/", day),
            "stability-rollups/2024/20240110-active-daily.csv.gz"
        );
        assert_eq!(
            ACTIVES_WEEKLY.artifact_key("stability-rollups", day),
            "stability-rollups/2024/20240110-active-weekly.csv.gz"
        );
        assert_eq!(
            CRASHES.artifact_key("stability-rollups", day),
            "stability-rollups/2024/20240110-crashes.csv.gz"
        );
    }

    #[test]
    fn for_kind_round_trips() {
        for spec in ALL_SPECS {
            assert_eq!(AggregationSpec::for_kind(spec.kind), *spec);
        }
    }

    #[test]
    fn shard_columns_cover_inputs() {
        let counts = COUNTS.shard_columns();
        assert_eq!(counts.len(), 12 + 15);
        assert!(counts.contains(&"reason"));
        assert!(!counts.contains(&"subsessiondate"));

        let actives = ACTIVES_WEEKLY.shard_columns();
        assert!(actives.contains(&"clientid"));
        assert!(actives.contains(&"subsessiondate"));
        assert!(!actives.contains(&"buildid"));
    }

    #[test]
    fn actives_filter_spans_window() {
        assert_eq!(
            ACTIVES_DAILY.row_filter(10),
            RowFilter::Lookback {
                column: "subsessiondate",
                span: 11
            }
        );
        assert_eq!(
            ACTIVES_WEEKLY.row_filter(10),
            RowFilter::Lookback {
                column: "subsessiondate",
                span: 18
            }
        );
        assert_eq!(CRASHES.row_filter(10), RowFilter::OnDay { column: "crashdate" });
    }

    #[test]
    fn final_queries_are_read_only_and_fully_bound() {
        let day = ymd(2024, 1, 10);
        for spec in ALL_SPECS {
            let template = ShardTemplate::new(spec.template).unwrap();
            let window = spec.window.resolve(day, 2, ymd(2024, 1, 20)).unwrap();
            let union = ShardUnionBuilder::build(
                &template,
                window,
                &spec.shard_columns(),
                &spec.row_filter(2),
            )
            .unwrap();
            let query = spec.final_query(&union);

            validate_read_only(query.sql()).unwrap();
            let bound = query.bind(&spec.params(day)).unwrap();
            assert_eq!(bound.len(), query.slots().len());
            assert!(!query.sql().contains('\''));
        }
    }
}
