//! INSERT statement builder.

use crate::value::{SqlValue, ToSqlValue};

/// An INSERT statement with one or more rows.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertQuery {
    pub(crate) table: String,
    pub(crate) columns: Vec<String>,
    pub(crate) rows: Vec<Vec<SqlValue>>,
}

impl InsertQuery {
    /// Creates an insert into `table` (without prefix).
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Replaces the column list.
    #[must_use]
    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// Appends a row of values, in column order.
    #[must_use]
    pub fn values(mut self, row: Vec<SqlValue>) -> Self {
        self.rows.push(row);
        self
    }

    /// Sets `column` in the single row of a one-row insert, replacing a
    /// previous value for the same column.
    #[must_use]
    pub fn set(mut self, column: &str, value: impl ToSqlValue) -> Self {
        if self.rows.is_empty() {
            self.rows.push(Vec::new());
        }
        let value = value.to_sql_value();
        match self.columns.iter().position(|c| c == column) {
            Some(position) => {
                for row in &mut self.rows {
                    if let Some(slot) = row.get_mut(position) {
                        *slot = value.clone();
                    }
                }
            }
            None => {
                self.columns.push(column.to_string());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
        self
    }

    /// Target table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }
}
