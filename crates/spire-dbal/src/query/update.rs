//! UPDATE statement builder.

use indexmap::IndexMap;

use super::{Filter, Operand, WhereTree};
use crate::value::ToSqlValue;

/// An UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateQuery {
    pub(crate) table: String,
    pub(crate) values: IndexMap<String, Operand>,
    pub(crate) wheres: WhereTree,
}

impl UpdateQuery {
    /// Creates an update of `table` (without prefix).
    #[must_use]
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            values: IndexMap::new(),
            wheres: WhereTree::new(),
        }
    }

    /// Sets `column` to a bound value, replacing any previous assignment.
    #[must_use]
    pub fn set(mut self, column: &str, value: impl ToSqlValue) -> Self {
        self.values
            .insert(column.to_string(), Operand::Value(value.to_sql_value()));
        self
    }

    /// Sets `column` to an SQL expression, e.g. `"counter + 1"`.
    #[must_use]
    pub fn set_raw(mut self, column: &str, expression: &str) -> Self {
        self.values
            .insert(column.to_string(), Operand::Raw(expression.to_string()));
        self
    }

    /// Sets `column` to the value of another column.
    #[must_use]
    pub fn set_column(mut self, column: &str, other: &str) -> Self {
        self.values
            .insert(column.to_string(), Operand::Identifier(other.to_string()));
        self
    }
}

impl Filter for UpdateQuery {
    fn where_tree(&mut self) -> &mut WhereTree {
        &mut self.wheres
    }
}
