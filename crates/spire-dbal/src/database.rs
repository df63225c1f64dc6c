//! Database and table facades.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::dialect::Dialect;
use crate::driver::{Driver, ExecOutcome, QueryResult, Row};
use crate::error::{DbalError, Result};
use crate::query::{
    Aggregate, CompiledQuery, DeleteQuery, InsertQuery, SelectQuery, Statement, UpdateQuery,
};
use crate::schema::{AbstractType, SchemaBuilder, TableState};
use crate::value::{SqlValue, ToSqlValue};

/// One named database: a driver plus a table prefix.
///
/// Builders handed out by a database take unprefixed table names; the
/// prefix is applied when they are compiled.
#[derive(Debug)]
pub struct Database<D: Driver> {
    name: String,
    prefix: String,
    driver: D,
    level: AtomicUsize,
}

impl<D: Driver> Database<D> {
    /// Creates a database over `driver`.
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, driver: D) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            driver,
            level: AtomicUsize::new(0),
        }
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Underlying driver.
    #[must_use]
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Dialect of the driver.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.driver.dialect()
    }

    /// Current transaction nesting level, 0 outside transactions.
    #[must_use]
    pub fn transaction_level(&self) -> usize {
        self.level.load(Ordering::SeqCst)
    }

    /// Runs a statement returning no rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::Driver`] when the statement fails.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecOutcome> {
        debug!(database = %self.name, sql = %sql, "Executing SQL");
        self.driver.execute(sql, params).await
    }

    /// Runs a statement returning rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::Driver`] when the statement fails.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        debug!(database = %self.name, sql = %sql, "Querying SQL");
        self.driver.query(sql, params).await
    }

    /// Compiles a builder against this database's dialect and prefix.
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::QueryCompilation`] for malformed builders.
    pub fn compile(&self, statement: &impl Statement) -> Result<CompiledQuery> {
        statement.compile(self.dialect(), &self.prefix)
    }

    /// Compiles and executes a builder.
    ///
    /// # Errors
    ///
    /// Compilation or driver errors.
    pub async fn run(&self, statement: &impl Statement) -> Result<ExecOutcome> {
        let compiled = self.compile(statement)?;
        self.execute(&compiled.sql, &compiled.params).await
    }

    /// Compiles and runs a SELECT.
    ///
    /// # Errors
    ///
    /// Compilation or driver errors.
    pub async fn fetch(&self, query: &SelectQuery) -> Result<QueryResult> {
        let compiled = self.compile(query)?;
        self.query(&compiled.sql, &compiled.params).await
    }

    /// Rows of a SELECT.
    ///
    /// # Errors
    ///
    /// Compilation or driver errors.
    pub async fn fetch_all(&self, query: &SelectQuery) -> Result<Vec<Row>> {
        Ok(self.fetch(query).await?.into_rows())
    }

    /// First row of a SELECT. The query is limited to one row.
    ///
    /// # Errors
    ///
    /// Compilation or driver errors.
    pub async fn fetch_one(&self, query: &SelectQuery) -> Result<Option<Row>> {
        let query = query.clone().limit(1);
        Ok(self.fetch_all(&query).await?.into_iter().next())
    }

    /// Scalar result of `function(column)` over the rows `query` selects.
    ///
    /// # Errors
    ///
    /// Compilation or driver errors.
    pub async fn aggregate(
        &self,
        query: &SelectQuery,
        function: Aggregate,
        column: &str,
    ) -> Result<SqlValue> {
        Ok(self.fetch(&query.aggregate(function, column)).await?.scalar())
    }

    /// `SELECT * FROM table`.
    #[must_use]
    pub fn select(&self, table: &str) -> SelectQuery {
        SelectQuery::from(table)
    }

    /// `INSERT INTO table`.
    #[must_use]
    pub fn insert(&self, table: &str) -> InsertQuery {
        InsertQuery::new(table)
    }

    /// `UPDATE table`.
    #[must_use]
    pub fn update(&self, table: &str) -> UpdateQuery {
        UpdateQuery::table(table)
    }

    /// `DELETE FROM table`.
    #[must_use]
    pub fn delete(&self, table: &str) -> DeleteQuery {
        DeleteQuery::from(table)
    }

    /// Whether table `name` (unprefixed) exists.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn has_table(&self, name: &str) -> Result<bool> {
        self.driver.has_table(&format!("{}{name}", self.prefix)).await
    }

    /// Table `name` (unprefixed). The table does not have to exist.
    #[must_use]
    pub fn table(&self, name: &str) -> Table<'_, D> {
        Table {
            database: self,
            name: name.to_string(),
        }
    }

    /// Every table carrying this database's prefix.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn tables(&self) -> Result<Vec<Table<'_, D>>> {
        let names = self.driver.table_names().await?;
        Ok(names
            .iter()
            .filter_map(|name| name.strip_prefix(&self.prefix))
            .map(|name| self.table(name))
            .collect())
    }

    /// Live state of table `name` (unprefixed).
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn table_state(&self, name: &str) -> Result<Option<TableState>> {
        self.driver
            .table_state(&format!("{}{name}", self.prefix))
            .await
    }

    /// Schema builder for this database's prefix.
    #[must_use]
    pub fn schema_builder(&self) -> SchemaBuilder {
        SchemaBuilder::new(self.prefix.clone())
    }

    /// Opens a transaction, or a savepoint when one is already open.
    ///
    /// # Errors
    ///
    /// [`DbalError::Transaction`] when nesting is requested on a dialect
    /// without savepoints; driver errors otherwise.
    pub async fn begin(&self) -> Result<()> {
        let level = self.transaction_level();
        if level == 0 {
            debug!(database = %self.name, "Begin transaction");
            self.driver.begin().await?;
        } else if self.dialect().supports_savepoints() {
            self.execute(&self.dialect().savepoint(level + 1), &[]).await?;
        } else {
            return Err(DbalError::Transaction(format!(
                "{} does not support nested transactions",
                self.dialect().name()
            )));
        }
        self.level.store(level + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Commits the innermost transaction or releases its savepoint.
    ///
    /// # Errors
    ///
    /// [`DbalError::Transaction`] when no transaction is open; driver
    /// errors otherwise.
    pub async fn commit(&self) -> Result<()> {
        let level = self.open_level("commit")?;
        self.level.store(level - 1, Ordering::SeqCst);
        if level == 1 {
            debug!(database = %self.name, "Commit transaction");
            self.driver.commit().await
        } else {
            self.execute(&self.dialect().release_savepoint(level), &[])
                .await
                .map(|_| ())
        }
    }

    /// Rolls back the innermost transaction or savepoint.
    ///
    /// # Errors
    ///
    /// [`DbalError::Transaction`] when no transaction is open; driver
    /// errors otherwise.
    pub async fn rollback(&self) -> Result<()> {
        let level = self.open_level("rollback")?;
        self.level.store(level - 1, Ordering::SeqCst);
        if level == 1 {
            debug!(database = %self.name, "Rollback transaction");
            self.driver.rollback().await
        } else {
            self.execute(&self.dialect().rollback_savepoint(level), &[])
                .await
                .map(|_| ())
        }
    }

    fn open_level(&self, action: &str) -> Result<usize> {
        match self.transaction_level() {
            0 => Err(DbalError::Transaction(format!(
                "cannot {action}: no transaction is open"
            ))),
            level => Ok(level),
        }
    }

    /// Runs `callback` in a transaction: committed when it returns `Ok`,
    /// rolled back when it returns `Err`. A failing rollback is logged and
    /// the callback's error returned.
    ///
    /// # Errors
    ///
    /// The callback's error, or a begin or commit error converted into `E`.
    pub async fn transaction<F, Fut, T, E>(&self, callback: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<DbalError>,
    {
        self.begin().await?;
        match callback().await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.rollback().await {
                    warn!(database = %self.name, error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// A table of one database, addressed by its unprefixed name.
#[derive(Debug)]
pub struct Table<'a, D: Driver> {
    database: &'a Database<D>,
    name: String,
}

impl<'a, D: Driver> Table<'a, D> {
    /// Name without prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name with prefix.
    #[must_use]
    pub fn real_name(&self) -> String {
        format!("{}{}", self.database.prefix(), self.name)
    }

    /// Owning database.
    #[must_use]
    pub const fn database(&self) -> &'a Database<D> {
        self.database
    }

    /// Whether the table exists.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn exists(&self) -> Result<bool> {
        self.database.has_table(&self.name).await
    }

    /// Live state of the table; empty when it does not exist.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn schema(&self) -> Result<TableState> {
        Ok(self
            .database
            .table_state(&self.name)
            .await?
            .unwrap_or_else(|| TableState::new(self.real_name())))
    }

    /// Column names and their abstract types.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn columns(&self) -> Result<IndexMap<String, AbstractType>> {
        Ok(self
            .schema()
            .await?
            .columns
            .into_iter()
            .map(|(name, column)| (name, column.abstract_type))
            .collect())
    }

    /// Removes every row.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn truncate(&self) -> Result<()> {
        debug!(table = %self.real_name(), "Truncating table");
        self.database.driver().truncate(&self.real_name()).await
    }

    /// Inserts one row and returns the generated key, when there is one.
    ///
    /// # Errors
    ///
    /// Compilation or driver errors.
    pub async fn insert<K, V>(&self, row: impl IntoIterator<Item = (K, V)>) -> Result<Option<i64>>
    where
        K: AsRef<str>,
        V: ToSqlValue,
    {
        // An empty row inserts defaults.
        let mut query = InsertQuery::new(&self.name).values(Vec::new());
        for (column, value) in row {
            query = query.set(column.as_ref(), value);
        }
        Ok(self.database.run(&query).await?.last_insert_id)
    }

    /// Inserts many rows sharing one column list.
    ///
    /// # Errors
    ///
    /// Compilation errors (including row width mismatch) or driver errors.
    pub async fn batch_insert<S: AsRef<str>>(
        &self,
        columns: &[S],
        rows: Vec<Vec<SqlValue>>,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut query = InsertQuery::new(&self.name).columns(columns);
        for row in rows {
            query = query.values(row);
        }
        Ok(self.database.run(&query).await?.rows_affected)
    }

    /// SELECT over this table.
    #[must_use]
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> SelectQuery {
        SelectQuery::from(&self.name).columns(columns)
    }

    /// UPDATE of this table with `values`.
    #[must_use]
    pub fn update<K, V>(&self, values: impl IntoIterator<Item = (K, V)>) -> UpdateQuery
    where
        K: AsRef<str>,
        V: ToSqlValue,
    {
        values
            .into_iter()
            .fold(UpdateQuery::table(&self.name), |query, (column, value)| {
                query.set(column.as_ref(), value)
            })
    }

    /// DELETE from this table.
    #[must_use]
    pub fn delete(&self) -> DeleteQuery {
        DeleteQuery::from(&self.name)
    }

    /// Number of rows.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn count(&self) -> Result<i64> {
        let value = self.aggregate(Aggregate::Count, "*").await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    /// Average of `column`, `None` for an empty table.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn avg(&self, column: &str) -> Result<Option<f64>> {
        Ok(self.aggregate(Aggregate::Avg, column).await?.as_f64())
    }

    /// Smallest value of `column`.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn min(&self, column: &str) -> Result<SqlValue> {
        self.aggregate(Aggregate::Min, column).await
    }

    /// Largest value of `column`.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn max(&self, column: &str) -> Result<SqlValue> {
        self.aggregate(Aggregate::Max, column).await
    }

    /// Sum of `column`.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn sum(&self, column: &str) -> Result<SqlValue> {
        self.aggregate(Aggregate::Sum, column).await
    }

    async fn aggregate(&self, function: Aggregate, column: &str) -> Result<SqlValue> {
        self.database
            .aggregate(&SelectQuery::from(&self.name), function, column)
            .await
    }

    /// Every row.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub async fn all(&self) -> Result<Vec<Row>> {
        self.database.fetch_all(&SelectQuery::from(&self.name)).await
    }
}
