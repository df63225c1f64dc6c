//! Driver boundary.
//!
//! A [`Driver`] owns the connection and performs all I/O. Everything above
//! it (quoting, compiling, planning) is synchronous and only hands finished
//! SQL and parameters across this boundary.

use indexmap::IndexMap;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::schema::TableState;
use crate::value::SqlValue;

/// One result row, columns in select order.
pub type Row = IndexMap<String, SqlValue>;

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Rows.
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Creates a result from its rows.
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// No rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// First column of the first row, `NULL` when there is none.
    #[must_use]
    pub fn scalar(&self) -> SqlValue {
        self.rows
            .first()
            .and_then(|row| row.values().next().cloned())
            .unwrap_or(SqlValue::Null)
    }

    /// Values of `column` across all rows.
    #[must_use]
    pub fn column(&self, column: &str) -> Vec<SqlValue> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column).cloned())
            .collect()
    }

    /// Consumes the result, returning its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Rows changed by the statement.
    pub rows_affected: u64,
    /// Key generated by an insert, when the DBMS reports one.
    pub last_insert_id: Option<i64>,
}

/// Connection to one DBMS.
///
/// Implementations keep a single logical connection: statements issued
/// between [`begin`](Driver::begin) and [`commit`](Driver::commit) run in
/// that transaction.
#[allow(async_fn_in_trait)]
pub trait Driver: Send + Sync {
    /// SQL dialect spoken by this connection.
    fn dialect(&self) -> &dyn Dialect;

    /// Runs a statement returning rows.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Runs a statement returning no rows.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecOutcome>;

    /// Names of every table, prefixes included.
    async fn table_names(&self) -> Result<Vec<String>>;

    /// Whether `table` (prefixed) exists.
    async fn has_table(&self, table: &str) -> Result<bool> {
        Ok(self.table_names().await?.iter().any(|t| t == table))
    }

    /// Live state of `table` (prefixed), `None` when it does not exist.
    async fn table_state(&self, table: &str) -> Result<Option<TableState>>;

    /// Opens a transaction.
    async fn begin(&self) -> Result<()>;

    /// Commits the open transaction.
    async fn commit(&self) -> Result<()>;

    /// Rolls back the open transaction.
    async fn rollback(&self) -> Result<()>;

    /// Removes every row of `table` (prefixed).
    async fn truncate(&self, table: &str) -> Result<()> {
        let sql = self.dialect().truncate(table);
        self.execute(&sql, &[]).await.map(|_| ())
    }
}
