//! Shard naming and the multi-shard `UNION ALL` query.

use chrono::NaiveDate;
use stability_db::{validate_identifier, NamedQuery};

use crate::calendar::format_compact;
use crate::error::{Result, RollupError};

/// Name of the bound parameter carrying the target date.
pub const DAY_PARAM: &str = "day";

/// Shard-name prefix; a shard is `prefix + YYYYMMDD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTemplate {
    prefix: String,
}

impl ShardTemplate {
    pub fn new(prefix: &str) -> Result<Self> {
        validate_identifier(prefix).map_err(|e| {
            RollupError::Configuration(format!("Invalid shard template '{}': {}", prefix, e))
        })?;
        Ok(Self {
            prefix: prefix.to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn shard(&self, date: NaiveDate) -> ShardReference {
        ShardReference {
            table: format!("{}{}", self.prefix, format_compact(date)),
            date,
        }
    }
}

/// One physical shard table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardReference {
    table: String,
    date: NaiveDate,
}

impl ShardReference {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

/// Per-row predicate applied inside every shard sub-select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
    /// `column = :day`
    OnDay { column: &'static str },
    /// `column <= :day AND column > :day - span`
    Lookback { column: &'static str, span: u32 },
}

impl RowFilter {
    pub fn column(&self) -> &'static str {
        match self {
            RowFilter::OnDay { column } | RowFilter::Lookback { column, .. } => *column,
        }
    }

    fn push_to(&self, query: &mut NamedQuery) {
        match *self {
            RowFilter::OnDay { column } => {
                query.push_sql(column).push_sql(" = ").push_param(DAY_PARAM);
            }
            RowFilter::Lookback { column, span } => {
                query
                    .push_sql(column)
                    .push_sql(" <= ")
                    .push_param(DAY_PARAM)
                    .push_sql(" AND ")
                    .push_sql(column)
                    .push_sql(" > CAST(")
                    .push_param(DAY_PARAM)
                    .push_sql(&format!(" AS DATE) - {}", span));
            }
        }
    }
}

pub struct ShardUnionBuilder;

impl ShardUnionBuilder {
    /// One `SELECT <columns> FROM <shard> WHERE <filter>` per date, joined
    /// with `UNION ALL`, in date order.
    ///
    /// Every shard must expose `columns`; that is the caller's contract.
    pub fn build<I>(
        template: &ShardTemplate,
        dates: I,
        columns: &[&str],
        filter: &RowFilter,
    ) -> Result<NamedQuery>
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        if columns.is_empty() {
            return Err(RollupError::Configuration(
                "Shard union needs at least one column".to_string(),
            ));
        }
        let filter_column = filter.column();
        for column in columns.iter().chain(std::iter::once(&filter_column)) {
            validate_identifier(column).map_err(|e| {
                RollupError::Configuration(format!("Invalid column '{}': {}", column, e))
            })?;
        }
        let projection = columns.join(", ");

        let mut query = NamedQuery::new();
        let mut shards = 0usize;
        for date in dates {
            if shards > 0 {
                query.push_sql("\nUNION ALL\n");
            }
            let shard = template.shard(date);
            query
                .push_sql("SELECT ")
                .push_sql(&projection)
                .push_sql(" FROM ")
                .push_sql(shard.table())
                .push_sql(" WHERE ");
            filter.push_to(&mut query);
            shards += 1;
        }

        if shards == 0 {
            return Err(RollupError::EmptyWindow {
                template: template.prefix().to_string(),
            });
        }
        Ok(query)
    }
}
