//! Error types for the database abstraction layer.

use thiserror::Error;

use crate::value::SqlValue;

/// Errors raised by the DBAL.
///
/// None of these are retried internally. DDL and non-idempotent DML are
/// unsafe to replay, so the caller decides.
#[derive(Debug, Error)]
pub enum DbalError {
    /// Declared schema or database configuration is malformed or missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The synchronizer found a change on a passive table.
    #[error(
        "passive table \"{table}\" would be altered (columns: [{}], indexes: [{}], foreign keys: [{}])",
        .columns.join(", "),
        .indexes.join(", "),
        .foreign_keys.join(", ")
    )]
    ForbiddenSchemaChange {
        /// Table name without prefix.
        table: String,
        /// Added, altered or dropped columns.
        columns: Vec<String>,
        /// Added, altered or dropped indexes.
        indexes: Vec<String>,
        /// Added, altered or dropped foreign keys.
        foreign_keys: Vec<String>,
    },

    /// A change the synchronizer refuses to generate DDL for.
    #[error("unsupported schema change on \"{table}\": {reason}")]
    UnsupportedSchemaChange {
        /// Table name without prefix.
        table: String,
        /// Why the change is refused.
        reason: String,
    },

    /// Malformed identifier or predicate, caught before any I/O.
    #[error("query compilation error: {0}")]
    QueryCompilation(String),

    /// The driver failed to execute a statement.
    #[error("driver error: {message} (query: {sql})")]
    Driver {
        /// The SQL that failed.
        sql: String,
        /// Parameters bound to the statement.
        params: Vec<SqlValue>,
        /// Driver-provided message.
        message: String,
    },

    /// Invalid transaction state transition.
    #[error("transaction error: {0}")]
    Transaction(String),
}

impl DbalError {
    /// Builds a driver error carrying the failed statement.
    pub fn driver(sql: &str, params: &[SqlValue], err: impl std::fmt::Display) -> Self {
        Self::Driver {
            sql: sql.to_string(),
            params: params.to_vec(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for DBAL operations.
pub type Result<T> = std::result::Result<T, DbalError>;
