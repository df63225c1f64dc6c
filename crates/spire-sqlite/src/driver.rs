//! sqlx-backed SQLite driver.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use spire_dbal::{
    DbalError, Dialect, Driver, ExecOutcome, QueryResult, Result, Row, SqlValue, SqliteDialect,
    TableState,
};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, SqlitePool, Transaction, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::debug;

use crate::introspect;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite connection.
///
/// Statements run on the pool, or on the open transaction between
/// [`Driver::begin`] and [`Driver::commit`] / [`Driver::rollback`].
pub struct SqliteDriver {
    pool: SqlitePool,
    dialect: SqliteDialect,
    transaction: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl SqliteDriver {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            dialect: SqliteDialect::new(),
            transaction: Mutex::new(None),
        }
    }

    /// Connects to `url` (e.g. `sqlite::memory:` or `sqlite://app.db`) with
    /// foreign keys enforced. A single pooled connection is kept so an
    /// in-memory database survives between statements.
    ///
    /// # Errors
    ///
    /// [`DbalError::Configuration`] for a malformed URL,
    /// [`DbalError::Driver`] when the connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DbalError::Configuration(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(Option::<Duration>::None)
            .max_lifetime(Option::<Duration>::None)
            .connect_with(options)
            .await
            .map_err(|e| DbalError::driver(url, &[], e))?;
        debug!(url = %url, "Connected to SQLite");
        Ok(Self::new(pool))
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn prepare<'q>(sql: &'q str, params: &[SqlValue]) -> SqliteQuery<'q> {
        params
            .iter()
            .cloned()
            .fold(sqlx::query(sql), bind_param)
    }
}

impl Driver for SqliteDriver {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let query = Self::prepare(sql, params);
        let mut transaction = self.transaction.lock().await;
        let rows = match transaction.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await,
            None => query.fetch_all(&self.pool).await,
        }
        .map_err(|e| DbalError::driver(sql, params, e))?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows
            .iter()
            .map(decode_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DbalError::driver(sql, params, e))?;
        Ok(QueryResult::new(columns, rows))
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecOutcome> {
        let query = Self::prepare(sql, params);
        let mut transaction = self.transaction.lock().await;
        let result = match transaction.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        }
        .map_err(|e| DbalError::driver(sql, params, e))?;

        let is_insert = sql
            .trim_start()
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("INSERT"));
        Ok(ExecOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: is_insert.then_some(result.last_insert_rowid()),
        })
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        let result = self.query(introspect::TABLE_NAMES_SQL, &[]).await?;
        Ok(result
            .column("name")
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn table_state(&self, table: &str) -> Result<Option<TableState>> {
        introspect::table_state(self, table).await
    }

    async fn begin(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        if transaction.is_some() {
            return Err(DbalError::Transaction(String::from(
                "a transaction is already open on this connection",
            )));
        }
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbalError::driver("BEGIN", &[], e))?;
        *transaction = Some(tx);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let tx = self.transaction.lock().await.take().ok_or_else(|| {
            DbalError::Transaction(String::from("cannot commit: no transaction is open"))
        })?;
        tx.commit()
            .await
            .map_err(|e| DbalError::driver("COMMIT", &[], e))
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self.transaction.lock().await.take().ok_or_else(|| {
            DbalError::Transaction(String::from("cannot rollback: no transaction is open"))
        })?;
        tx.rollback()
            .await
            .map_err(|e| DbalError::driver("ROLLBACK", &[], e))
    }
}

/// Binds a SqlValue parameter to a query.
fn bind_param(query: SqliteQuery<'_>, value: SqlValue) -> SqliteQuery<'_> {
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
        SqlValue::DateTime(dt) => query.bind(dt),
    }
}

/// Converts a row by the storage class of each value.
fn decode_row(row: &SqliteRow) -> std::result::Result<Row, sqlx::Error> {
    let mut decoded = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let storage = raw.type_info().name().to_ascii_uppercase();
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" => SqlValue::Int(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" => SqlValue::Float(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        decoded.insert(column.name().to_string(), value);
    }
    Ok(decoded)
}
