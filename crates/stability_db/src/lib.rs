//! Warehouse query layer for the stability rollup engine.
//!
//! The rollup engine only ever reads from the warehouse. Everything it needs
//! goes through [`QueryExecutor`], which the DuckDB [`DbConnection`]
//! implements:
//!
//! ```rust,ignore
//! use stability_db::{DbConnection, NamedParams, NamedQuery, QueryExecutor};
//!
//! let conn = DbConnection::open_from_url_readonly("duckdb:/data/warehouse.duckdb")?;
//!
//! let mut query = NamedQuery::new();
//! query.push_sql("SELECT COUNT(*) FROM main_summary_20240110 WHERE subsessiondate = ");
//! query.push_param("day");
//!
//! let rows = conn.query_named(&query, &NamedParams::new().with("day", day))?;
//! ```

mod backend;
mod guard;
mod named;

pub use backend::{AccessMode, BackendError, DbConnection, DbRow, DbValue, FromDbValue};
pub use guard::{validate_identifier, validate_read_only, SqlGuardError};
pub use named::{NamedParams, NamedQuery};

/// Read access to the warehouse.
///
/// One implementation is used per run and every query goes through it
/// sequentially. Results are fully materialized grouped result sets, in the
/// order the backend produced them.
pub trait QueryExecutor {
    /// Run a parameterized query, binding each slot of `query` by name.
    fn query_named(&self, query: &NamedQuery, params: &NamedParams)
        -> Result<Vec<DbRow>, BackendError>;

    /// Whether a table with this exact name exists.
    fn table_exists(&self, table: &str) -> Result<bool, BackendError>;
}

impl QueryExecutor for DbConnection {
    fn query_named(
        &self,
        query: &NamedQuery,
        params: &NamedParams,
    ) -> Result<Vec<DbRow>, BackendError> {
        let bound = query.bind(params)?;
        self.query_all(query.sql(), &bound)
    }

    fn table_exists(&self, table: &str) -> Result<bool, BackendError> {
        let count: i64 = self.query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            &[DbValue::from(table)],
        )?;
        Ok(count > 0)
    }
}
