//! Database backend.
//!
//! DuckDB-only synchronous backend.
//! - Columnar, OLAP-optimized, supports the window functions the actives
//!   rollup pushes down
//! - One connection per run, shared by reference

use chrono::{Datelike, NaiveDate};
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug_span, info};

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Errors from database backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation requires write access but database is read-only")]
    ReadOnly,

    #[error("Query error: {0}")]
    Query(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backend not available: {0}")]
    NotAvailable(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

/// Value type for query parameters and result cells.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    /// Exact decimal, kept in its canonical text form.
    Decimal(String),
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        DbValue::Integer(v as i64)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Real(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

impl From<NaiveDate> for DbValue {
    fn from(v: NaiveDate) -> Self {
        DbValue::Date(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DbValue::Null,
        }
    }
}

/// Row data from a query result.
#[derive(Debug, Clone)]
pub struct DbRow {
    columns: Rc<[String]>,
    values: Vec<DbValue>,
}

impl DbRow {
    /// Create a new row with column names and values.
    pub fn new(columns: Vec<String>, values: Vec<DbValue>) -> Self {
        Self {
            columns: columns.into(),
            values,
        }
    }

    fn with_shared_columns(columns: Rc<[String]>, values: Vec<DbValue>) -> Self {
        Self { columns, values }
    }

    /// Get a value by column index.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, BackendError> {
        self.values
            .get(index)
            .ok_or_else(|| {
                BackendError::TypeConversion(format!("Column index {} out of bounds", index))
            })
            .and_then(|v| T::from_db_value(v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All cell values in projection order.
    pub fn values(&self) -> &[DbValue] {
        &self.values
    }
}

/// Trait for converting from DbValue.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError>;
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            DbValue::Null => Err(BackendError::TypeConversion(
                "i64 field is NULL - use Option<i64> for nullable columns".to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected integer".to_string())),
        }
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            DbValue::Decimal(v) => v
                .parse()
                .map_err(|e| BackendError::TypeConversion(format!("Invalid decimal {}: {}", v, e))),
            DbValue::Null => Err(BackendError::TypeConversion(
                "f64 field is NULL - use Option<f64> for nullable columns".to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected real".to_string())),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            DbValue::Null => Err(BackendError::TypeConversion(
                "String field is NULL - use Option<String> for nullable columns".to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected text".to_string())),
        }
    }
}

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Boolean(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v != 0),
            DbValue::Null => Err(BackendError::TypeConversion(
                "bool field is NULL - use Option<bool> for nullable columns".to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected boolean".to_string())),
        }
    }
}

impl FromDbValue for NaiveDate {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Date(v) => Ok(*v),
            DbValue::Text(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .map_err(|e| BackendError::TypeConversion(format!("Invalid date: {}", e))),
            DbValue::Null => Err(BackendError::TypeConversion(
                "NaiveDate field is NULL - use Option<NaiveDate> for nullable columns"
                    .to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected date".to_string())),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Null => Ok(None),
            _ => T::from_db_value(value).map(Some),
        }
    }
}

/// Warehouse connection.
#[derive(Clone)]
pub struct DbConnection {
    conn: Rc<duckdb::Connection>,
    access_mode: AccessMode,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("backend", &"DuckDB")
            .field("access_mode", &self.access_mode)
            .finish()
    }
}

impl DbConnection {
    /// Open a database from a URL.
    ///
    /// Supported forms: `duckdb:<path>` and `duckdb::memory:`.
    pub fn open_from_url(url: &str) -> Result<Self, BackendError> {
        match parse_duckdb_url(url)? {
            DuckDbTarget::Memory => Self::open_duckdb_memory(),
            DuckDbTarget::File(path) => Self::open_duckdb(Path::new(&path)),
        }
    }

    /// Open a database from a URL in read-only mode.
    ///
    /// In-memory databases cannot be opened read-only.
    pub fn open_from_url_readonly(url: &str) -> Result<Self, BackendError> {
        match parse_duckdb_url(url)? {
            DuckDbTarget::Memory => Err(BackendError::NotAvailable(
                "In-memory databases cannot be opened read-only".to_string(),
            )),
            DuckDbTarget::File(path) => Self::open_duckdb_readonly(Path::new(&path)),
        }
    }

    /// Open a DuckDB database file for reading and writing.
    pub fn open_duckdb(path: &Path) -> Result<Self, BackendError> {
        let conn = Rc::new(duckdb::Connection::open(path)?);
        info!("Opened DuckDB database: {}", path.display());

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadWrite,
        })
    }

    /// Open a DuckDB database file in read-only mode.
    pub fn open_duckdb_readonly(path: &Path) -> Result<Self, BackendError> {
        use duckdb::{AccessMode as DuckAccessMode, Config};

        if !path.exists() {
            return Err(BackendError::NotAvailable(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        let config = Config::default()
            .access_mode(DuckAccessMode::ReadOnly)
            .map_err(BackendError::from)?;
        let conn = Rc::new(duckdb::Connection::open_with_flags(path, config)?);
        info!("Opened DuckDB database (read-only): {}", path.display());

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadOnly,
        })
    }

    /// Open an in-memory DuckDB database (for testing).
    pub fn open_duckdb_memory() -> Result<Self, BackendError> {
        let conn = Rc::new(duckdb::Connection::open_in_memory()?);
        info!("Opened in-memory DuckDB database");

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadWrite,
        })
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    /// Execute a SQL statement (no results).
    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        if self.access_mode == AccessMode::ReadOnly {
            return Err(BackendError::ReadOnly);
        }

        let op = sql_op_name(sql);
        let sql_hash = hash_sql(sql);
        let span = debug_span!(
            "db.exec",
            op = op,
            sql_hash = %sql_hash,
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();

        let mut stmt = self.conn.prepare(sql)?;
        let duckdb_params = to_duckdb_params(params);
        let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
            .iter()
            .map(|v| v as &dyn duckdb::ToSql)
            .collect();
        let rows = stmt.execute(param_refs.as_slice())?;
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(rows as u64)
    }

    /// Execute a batch of SQL statements.
    pub fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        if self.access_mode == AccessMode::ReadOnly {
            return Err(BackendError::ReadOnly);
        }

        let sql_hash = hash_sql(sql);
        let span = debug_span!(
            "db.exec_batch",
            op = "BATCH",
            sql_hash = %sql_hash,
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();
        self.conn.execute_batch(sql)?;
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(())
    }

    /// Insert rows into a table with chunked multi-row `INSERT` statements.
    ///
    /// Column order must match the row value order.
    pub fn insert_rows(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<DbValue>],
    ) -> Result<u64, BackendError> {
        if rows.is_empty() {
            return Ok(0);
        }
        if columns.is_empty() {
            return Err(BackendError::InvalidInput(
                "insert_rows requires at least one column".to_string(),
            ));
        }
        if columns.len() > MAX_PARAMS {
            return Err(BackendError::InvalidInput(format!(
                "Too many columns ({}) for max params ({})",
                columns.len(),
                MAX_PARAMS
            )));
        }
        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(BackendError::InvalidInput(format!(
                    "Row {} has {} values, expected {}",
                    index,
                    row.len(),
                    columns.len()
                )));
            }
        }

        let quoted_cols = columns
            .iter()
            .map(|col| quote_ident(col))
            .collect::<Vec<_>>()
            .join(", ");
        let row_clause = format!("({})", vec!["?"; columns.len()].join(", "));
        let rows_per_chunk = MAX_PARAMS / columns.len();

        let mut total = 0;
        for chunk in rows.chunks(rows_per_chunk) {
            let values_clause = vec![row_clause.as_str(); chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(table),
                quoted_cols,
                values_clause
            );
            let params: Vec<DbValue> = chunk.iter().flatten().cloned().collect();
            self.execute(&sql, &params)?;
            total += chunk.len() as u64;
        }

        Ok(total)
    }

    /// Query and return all rows, in the order the backend yields them.
    pub fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, BackendError> {
        let op = sql_op_name(sql);
        let sql_hash = hash_sql(sql);
        let span = debug_span!(
            "db.query",
            op = op,
            sql_hash = %sql_hash,
            params = params.len(),
            rows = tracing::field::Empty,
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();

        let mut stmt = self.conn.prepare(sql)?;
        let duckdb_params = to_duckdb_params(params);
        let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
            .iter()
            .map(|v| v as &dyn duckdb::ToSql)
            .collect();

        let mut rows_iter = stmt.query(param_refs.as_slice())?;

        let (column_count, columns) = if let Some(stmt_ref) = rows_iter.as_ref() {
            let count = stmt_ref.column_count();
            let cols: Vec<String> = (0..count)
                .map(|i| {
                    stmt_ref
                        .column_name(i)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|_| format!("col{}", i))
                })
                .collect();
            (count, Rc::<[String]>::from(cols))
        } else {
            return Ok(Vec::new());
        };

        let mut result = Vec::new();
        while let Some(row) = rows_iter.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(duckdb_value_to_db_value(row, i)?);
            }
            result.push(DbRow::with_shared_columns(Rc::clone(&columns), values));
        }

        span.record("rows", result.len() as u64);
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(result)
    }

    /// Query and return the first row, failing when there is none.
    pub fn query_one(&self, sql: &str, params: &[DbValue]) -> Result<DbRow, BackendError> {
        self.query_all(sql, params)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Query("Expected one row, got none".to_string()))
    }

    /// Query and return a single scalar value.
    pub fn query_scalar<T: FromDbValue>(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        let row = self.query_one(sql, params)?;
        row.get(0)
    }
}

const MAX_PARAMS: usize = 999;

enum DuckDbTarget {
    Memory,
    File(String),
}

fn parse_duckdb_url(url: &str) -> Result<DuckDbTarget, BackendError> {
    let rest = url.trim().strip_prefix("duckdb:").ok_or_else(|| {
        BackendError::NotAvailable(format!("Unsupported database URL: {}", url))
    })?;
    match rest {
        "" => Err(BackendError::NotAvailable(format!(
            "Database URL has no path: {}",
            url
        ))),
        ":memory:" => Ok(DuckDbTarget::Memory),
        path => Ok(DuckDbTarget::File(path.to_string())),
    }
}

fn to_duckdb_params(params: &[DbValue]) -> Vec<duckdb::types::Value> {
    params
        .iter()
        .map(|p| match p {
            DbValue::Null => duckdb::types::Value::Null,
            DbValue::Integer(v) => duckdb::types::Value::BigInt(*v),
            DbValue::Real(v) => duckdb::types::Value::Double(*v),
            DbValue::Text(v) => duckdb::types::Value::Text(v.clone()),
            DbValue::Boolean(v) => duckdb::types::Value::Boolean(*v),
            DbValue::Date(v) => {
                duckdb::types::Value::Date32(v.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
            }
            DbValue::Decimal(v) => duckdb::types::Value::Text(v.clone()),
        })
        .collect()
}

fn duckdb_value_to_db_value(row: &duckdb::Row, index: usize) -> Result<DbValue, BackendError> {
    use duckdb::types::ValueRef;

    let value = match row.get_ref(index)? {
        ValueRef::Null => DbValue::Null,
        ValueRef::Boolean(v) => DbValue::Boolean(v),
        ValueRef::TinyInt(v) => DbValue::Integer(v.into()),
        ValueRef::SmallInt(v) => DbValue::Integer(v.into()),
        ValueRef::Int(v) => DbValue::Integer(v.into()),
        ValueRef::BigInt(v) => DbValue::Integer(v),
        // SUM over integer columns widens to HUGEINT
        ValueRef::HugeInt(v) => DbValue::Integer(i64::try_from(v).map_err(|_| {
            BackendError::TypeConversion(format!(
                "HUGEINT {} at column {} does not fit in 64 bits",
                v, index
            ))
        })?),
        ValueRef::UTinyInt(v) => DbValue::Integer(v.into()),
        ValueRef::USmallInt(v) => DbValue::Integer(v.into()),
        ValueRef::UInt(v) => DbValue::Integer(v.into()),
        ValueRef::UBigInt(v) => DbValue::Integer(i64::try_from(v).map_err(|_| {
            BackendError::TypeConversion(format!(
                "UBIGINT {} at column {} does not fit in 64 bits",
                v, index
            ))
        })?),
        ValueRef::Float(v) => DbValue::Real(v.into()),
        ValueRef::Double(v) => DbValue::Real(v),
        ValueRef::Decimal(v) => DbValue::Decimal(v.to_string()),
        ValueRef::Text(bytes) => DbValue::Text(String::from_utf8(bytes.to_vec()).map_err(|e| {
            BackendError::TypeConversion(format!("Invalid UTF-8 at column {}: {}", index, e))
        })?),
        ValueRef::Date32(days) => {
            let date = UNIX_EPOCH_DAYS_FROM_CE
                .checked_add(days)
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .ok_or_else(|| {
                    BackendError::TypeConversion(format!(
                        "DATE {} days from epoch at column {} is out of range",
                        days, index
                    ))
                })?;
            DbValue::Date(date)
        }
        other => {
            return Err(BackendError::TypeConversion(format!(
                "Unsupported DuckDB type {:?} at column {}",
                other.data_type(),
                index
            )))
        }
    };
    Ok(value)
}

fn quote_ident(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('"');
    for ch in name.chars() {
        if ch == '"' {
            escaped.push('"');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    escaped
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit hash for low-cardinality, stable identification.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}
