//! SELECT statement builder.

use indexmap::IndexMap;

use super::{Filter, WhereTree};

/// Alias of the derived table wrapping grouped or limited aggregates.
pub const AGGREGATE_ALIAS: &str = "spire_aggregate";

/// Join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
}

impl JoinKind {
    /// SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
        }
    }
}

/// A joined table and its ON tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Join type.
    pub kind: JoinKind,
    /// Table, optionally `table AS alias`, without prefix.
    pub table: String,
    /// ON predicates.
    pub on: WhereTree,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl Direction {
    /// SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// `COUNT`
    Count,
    /// `AVG`
    Avg,
    /// `MIN`
    Min,
    /// `MAX`
    Max,
    /// `SUM`
    Sum,
}

impl Aggregate {
    /// SQL function name.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Sum => "SUM",
        }
    }
}

/// What a SELECT reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Table, optionally `table AS alias`, without prefix.
    Table(String),
    /// Derived table with its alias.
    Query(Box<SelectQuery>, String),
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub(crate) source: Source,
    pub(crate) distinct: bool,
    pub(crate) columns: Vec<String>,
    pub(crate) joins: Vec<Join>,
    pub(crate) wheres: WhereTree,
    pub(crate) group_by: Vec<String>,
    pub(crate) havings: WhereTree,
    pub(crate) order_by: IndexMap<String, Direction>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
}

impl SelectQuery {
    /// Creates `SELECT * FROM table`.
    #[must_use]
    pub fn from(table: &str) -> Self {
        Self::from_source(Source::Table(table.to_string()))
    }

    fn from_source(source: Source) -> Self {
        Self {
            source,
            distinct: false,
            columns: vec![String::from("*")],
            joins: Vec::new(),
            wheres: WhereTree::new(),
            group_by: Vec::new(),
            havings: WhereTree::new(),
            order_by: IndexMap::new(),
            limit: None,
            offset: None,
        }
    }

    /// Source table or derived query.
    #[must_use]
    pub const fn source(&self) -> &Source {
        &self.source
    }

    /// Selected columns.
    #[must_use]
    pub fn selected_columns(&self) -> &[String] {
        &self.columns
    }

    /// Joins.
    #[must_use]
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Replaces the selected columns.
    #[must_use]
    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        if self.columns.is_empty() {
            self.columns.push(String::from("*"));
        }
        self
    }

    /// Adds columns to the selection.
    #[must_use]
    pub fn add_columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        if self.columns == ["*"] {
            self.columns.clear();
        }
        for column in columns {
            let column = column.as_ref().to_string();
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
        self
    }

    /// `SELECT DISTINCT`.
    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Adds a join with its ON tree.
    #[must_use]
    pub fn join(mut self, kind: JoinKind, table: &str, on: impl FnOnce(WhereTree) -> WhereTree) -> Self {
        self.joins.push(Join {
            kind,
            table: table.to_string(),
            on: on(WhereTree::new()),
        });
        self
    }

    /// `INNER JOIN`.
    #[must_use]
    pub fn inner_join(self, table: &str, on: impl FnOnce(WhereTree) -> WhereTree) -> Self {
        self.join(JoinKind::Inner, table, on)
    }

    /// `LEFT JOIN`.
    #[must_use]
    pub fn left_join(self, table: &str, on: impl FnOnce(WhereTree) -> WhereTree) -> Self {
        self.join(JoinKind::Left, table, on)
    }

    /// `RIGHT JOIN`.
    #[must_use]
    pub fn right_join(self, table: &str, on: impl FnOnce(WhereTree) -> WhereTree) -> Self {
        self.join(JoinKind::Right, table, on)
    }

    /// Replaces GROUP BY.
    #[must_use]
    pub fn group_by<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.group_by = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// Adds a HAVING group.
    #[must_use]
    pub fn having(mut self, having: impl FnOnce(WhereTree) -> WhereTree) -> Self {
        let tree = having(WhereTree::new());
        for (connector, predicate) in tree.nodes().iter().cloned() {
            self.havings.push(connector, predicate);
        }
        self
    }

    /// Sets the direction for `column`, replacing any previous one.
    #[must_use]
    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order_by.insert(column.to_string(), direction);
        self
    }

    /// Sets LIMIT.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets OFFSET.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// LIMIT and OFFSET for a 1-based page.
    #[must_use]
    pub const fn paginate(self, page: u64, per_page: u64) -> Self {
        let page = if page == 0 { 1 } else { page };
        self.limit(per_page).offset((page - 1).saturating_mul(per_page))
    }

    /// Whether an aggregate must wrap this query instead of replacing its
    /// columns.
    #[must_use]
    pub fn needs_derived_aggregate(&self) -> bool {
        self.distinct || !self.group_by.is_empty() || self.limit.is_some() || self.offset.is_some()
    }

    /// Whether the result set exposes a column named `name`.
    fn projects(&self, name: &str) -> bool {
        self.columns.iter().any(|selected| {
            let exposed = selected
                .rsplit_once(" AS ")
                .or_else(|| selected.rsplit_once(" as "))
                .map_or(selected.as_str(), |(_, alias)| alias);
            let exposed = exposed.rsplit('.').next().unwrap_or(exposed).trim();
            exposed == "*" || exposed == name
        })
    }

    /// Query computing `function(column)` over the rows this query selects.
    ///
    /// A derived table gains `column` in its projection when the inner
    /// columns do not expose it.
    #[must_use]
    pub fn aggregate(&self, function: Aggregate, column: &str) -> Self {
        if self.needs_derived_aggregate() {
            // Qualifiers do not survive the derived table.
            let name = column.rsplit('.').next().unwrap_or(column);
            let mut inner = self.clone();
            inner.order_by.clear();
            if name != "*" && !inner.projects(name) {
                inner.columns.push(column.to_string());
            }
            return Self::from_source(Source::Query(
                Box::new(inner),
                AGGREGATE_ALIAS.to_string(),
            ))
            .columns(&[format!("{}({name}) AS aggregate", function.as_sql())]);
        }
        let mut query = self.clone();
        query.columns = vec![format!("{}({column}) AS aggregate", function.as_sql())];
        query.order_by.clear();
        query
    }

    /// `COUNT(*)` query.
    #[must_use]
    pub fn count_query(&self) -> Self {
        self.aggregate(Aggregate::Count, "*")
    }
}

impl Filter for SelectQuery {
    fn where_tree(&mut self) -> &mut WhereTree {
        &mut self.wheres
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_by_replaces_per_column() {
        let query = SelectQuery::from("users")
            .order_by("name", Direction::Asc)
            .order_by("id", Direction::Desc)
            .order_by("name", Direction::Desc);
        let order: Vec<(&str, Direction)> = query
            .order_by
            .iter()
            .map(|(c, d)| (c.as_str(), *d))
            .collect();
        assert_eq!(order, vec![("name", Direction::Desc), ("id", Direction::Desc)]);
    }

    #[test]
    fn columns_replace() {
        let query = SelectQuery::from("users").columns(&["id"]).columns(&["name"]);
        assert_eq!(query.selected_columns(), ["name"]);
    }

    #[test]
    fn paginate_is_one_based() {
        let query = SelectQuery::from("users").paginate(3, 10);
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(20));
        let first = SelectQuery::from("users").paginate(0, 10);
        assert_eq!(first.offset, Some(0));
        let far = SelectQuery::from("users").paginate(u64::MAX, 50);
        assert_eq!(far.offset, Some(u64::MAX));
    }

    #[test]
    fn plain_aggregate_replaces_columns() {
        let query = SelectQuery::from("users")
            .order_by("id", Direction::Asc)
            .count_query();
        assert_eq!(query.selected_columns(), ["COUNT(*) AS aggregate"]);
        assert!(query.order_by.is_empty());
        assert!(matches!(query.source(), Source::Table(_)));
    }

    #[test]
    fn limited_aggregate_wraps() {
        let query = SelectQuery::from("users").limit(5).aggregate(Aggregate::Sum, "users.balance");
        assert_eq!(query.selected_columns(), ["SUM(balance) AS aggregate"]);
        assert!(matches!(query.source(), Source::Query(_, alias) if alias == AGGREGATE_ALIAS));
    }
}
