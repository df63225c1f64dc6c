//! Query builders and their compiler.
//!
//! Builders are plain values describing a statement. Table names are kept
//! without prefix; the [`Compiler`] applies the prefix and collects bound
//! parameters in the order their placeholders appear.

mod compiler;
mod delete;
mod insert;
mod select;
mod update;

pub use compiler::{CompiledQuery, Compiler, Statement};
pub use delete::DeleteQuery;
pub use insert::InsertQuery;
pub use select::{Aggregate, Direction, Join, JoinKind, SelectQuery, Source, AGGREGATE_ALIAS};
pub use update::UpdateQuery;

use crate::value::{SqlValue, ToSqlValue};

/// How a predicate joins the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// `AND`
    And,
    /// `OR`
    Or,
}

impl Connector {
    /// SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Right hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Bound parameter.
    Value(SqlValue),
    /// Quoted identifier.
    Identifier(String),
    /// Parenthesized list of bound parameters.
    List(Vec<SqlValue>),
    /// `? AND ?` pair for `BETWEEN`.
    Range(SqlValue, SqlValue),
    /// Parenthesized sub-query.
    Query(Box<SelectQuery>),
    /// SQL fragment inserted verbatim.
    Raw(String),
}

/// One predicate of a WHERE, HAVING or ON clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column operator operand`.
    Compare {
        /// Left hand identifier or expression.
        column: String,
        /// Comparison operator.
        operator: String,
        /// Right hand side.
        operand: Operand,
    },
    /// Verbatim SQL with its own parameters.
    Raw {
        /// SQL fragment; placeholders are written as `?`.
        sql: String,
        /// Parameters for the fragment, in order.
        params: Vec<SqlValue>,
    },
    /// Parenthesized group.
    Group(WhereTree),
    /// `NOT (...)` group.
    Not(WhereTree),
}

/// Ordered list of predicates and their connectors.
///
/// Compiled as a left fold: whenever the connector changes the predicate
/// built so far is parenthesized, so `a AND b OR c` compiles to
/// `(a AND b) OR c` whatever the SQL precedence rules say.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WhereTree {
    nodes: Vec<(Connector, Predicate)>,
}

impl WhereTree {
    /// Creates an empty tree.
    #[must_use]
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// No predicates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Predicates with their connectors.
    #[must_use]
    pub fn nodes(&self) -> &[(Connector, Predicate)] {
        &self.nodes
    }

    /// Appends a predicate.
    pub fn push(&mut self, connector: Connector, predicate: Predicate) {
        if let Predicate::Group(ref tree) | Predicate::Not(ref tree) = predicate {
            if tree.is_empty() {
                return;
            }
        }
        self.nodes.push((connector, predicate));
    }

    /// `AND column operator value`.
    #[must_use]
    pub fn and(mut self, column: &str, operator: &str, value: impl ToSqlValue) -> Self {
        self.push(Connector::And, compare(column, operator, Operand::Value(value.to_sql_value())));
        self
    }

    /// `OR column operator value`.
    #[must_use]
    pub fn or(mut self, column: &str, operator: &str, value: impl ToSqlValue) -> Self {
        self.push(Connector::Or, compare(column, operator, Operand::Value(value.to_sql_value())));
        self
    }

    /// `AND left operator right` between two identifiers.
    #[must_use]
    pub fn on(mut self, left: &str, operator: &str, right: &str) -> Self {
        self.push(Connector::And, compare(left, operator, Operand::Identifier(right.to_string())));
        self
    }

    /// `OR left operator right` between two identifiers.
    #[must_use]
    pub fn or_on(mut self, left: &str, operator: &str, right: &str) -> Self {
        self.push(Connector::Or, compare(left, operator, Operand::Identifier(right.to_string())));
        self
    }
}

fn compare(column: &str, operator: &str, operand: Operand) -> Predicate {
    Predicate::Compare {
        column: column.to_string(),
        operator: operator.to_string(),
        operand,
    }
}

/// Predicate building shared by SELECT, UPDATE and DELETE builders.
pub trait Filter: Sized {
    /// The WHERE tree being built.
    fn where_tree(&mut self) -> &mut WhereTree;

    /// `AND column operator value`.
    #[must_use]
    fn where_(mut self, column: &str, operator: &str, value: impl ToSqlValue) -> Self {
        let operand = Operand::Value(value.to_sql_value());
        self.where_tree().push(Connector::And, compare(column, operator, operand));
        self
    }

    /// `AND column = value`. A NULL value compiles to `IS NULL`.
    #[must_use]
    fn where_eq(self, column: &str, value: impl ToSqlValue) -> Self {
        self.where_(column, "=", value)
    }

    /// `OR column operator value`.
    #[must_use]
    fn or_where(mut self, column: &str, operator: &str, value: impl ToSqlValue) -> Self {
        let operand = Operand::Value(value.to_sql_value());
        self.where_tree().push(Connector::Or, compare(column, operator, operand));
        self
    }

    /// `OR column = value`.
    #[must_use]
    fn or_where_eq(self, column: &str, value: impl ToSqlValue) -> Self {
        self.or_where(column, "=", value)
    }

    /// `AND column IN (...)`.
    #[must_use]
    fn where_in<V: ToSqlValue>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let list = values.into_iter().map(ToSqlValue::to_sql_value).collect();
        self.where_tree()
            .push(Connector::And, compare(column, "IN", Operand::List(list)));
        self
    }

    /// `AND column NOT IN (...)`.
    #[must_use]
    fn where_not_in<V: ToSqlValue>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let list = values.into_iter().map(ToSqlValue::to_sql_value).collect();
        self.where_tree()
            .push(Connector::And, compare(column, "NOT IN", Operand::List(list)));
        self
    }

    /// `AND column IN (sub-query)`.
    #[must_use]
    fn where_in_query(mut self, column: &str, query: SelectQuery) -> Self {
        self.where_tree().push(
            Connector::And,
            compare(column, "IN", Operand::Query(Box::new(query))),
        );
        self
    }

    /// `AND column IS NULL`.
    #[must_use]
    fn where_null(mut self, column: &str) -> Self {
        self.where_tree().push(
            Connector::And,
            compare(column, "IS", Operand::Raw(String::from("NULL"))),
        );
        self
    }

    /// `AND column IS NOT NULL`.
    #[must_use]
    fn where_not_null(mut self, column: &str) -> Self {
        self.where_tree().push(
            Connector::And,
            compare(column, "IS NOT", Operand::Raw(String::from("NULL"))),
        );
        self
    }

    /// `AND column BETWEEN low AND high`.
    #[must_use]
    fn where_between(mut self, column: &str, low: impl ToSqlValue, high: impl ToSqlValue) -> Self {
        let operand = Operand::Range(low.to_sql_value(), high.to_sql_value());
        self.where_tree()
            .push(Connector::And, compare(column, "BETWEEN", operand));
        self
    }

    /// `AND left operator right` between two identifiers.
    #[must_use]
    fn where_column(mut self, left: &str, operator: &str, right: &str) -> Self {
        let operand = Operand::Identifier(right.to_string());
        self.where_tree().push(Connector::And, compare(left, operator, operand));
        self
    }

    /// `AND <sql>` with its own `?` parameters.
    #[must_use]
    fn where_raw(mut self, sql: &str, params: Vec<SqlValue>) -> Self {
        self.where_tree().push(
            Connector::And,
            Predicate::Raw {
                sql: sql.to_string(),
                params,
            },
        );
        self
    }

    /// `AND (...)`.
    #[must_use]
    fn where_group(mut self, group: impl FnOnce(WhereTree) -> WhereTree) -> Self {
        let tree = group(WhereTree::new());
        self.where_tree().push(Connector::And, Predicate::Group(tree));
        self
    }

    /// `OR (...)`.
    #[must_use]
    fn or_where_group(mut self, group: impl FnOnce(WhereTree) -> WhereTree) -> Self {
        let tree = group(WhereTree::new());
        self.where_tree().push(Connector::Or, Predicate::Group(tree));
        self
    }

    /// `AND NOT (...)`.
    #[must_use]
    fn where_not(mut self, group: impl FnOnce(WhereTree) -> WhereTree) -> Self {
        let tree = group(WhereTree::new());
        self.where_tree().push(Connector::And, Predicate::Not(tree));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_groups_are_dropped() {
        let mut tree = WhereTree::new();
        tree.push(Connector::And, Predicate::Group(WhereTree::new()));
        assert!(tree.is_empty());
    }

    #[test]
    fn tree_keeps_insertion_order() {
        let tree = WhereTree::new().and("a", "=", 1).or("b", "=", 2);
        let connectors: Vec<Connector> = tree.nodes().iter().map(|(c, _)| *c).collect();
        assert_eq!(connectors, vec![Connector::And, Connector::Or]);
    }
}
