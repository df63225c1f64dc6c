//! Statement compilation.

use super::{
    Connector, DeleteQuery, InsertQuery, Operand, Predicate, SelectQuery, Source, UpdateQuery,
    WhereTree,
};
use crate::dialect::Dialect;
use crate::error::{DbalError, Result};
use crate::quoter::Quoter;
use crate::value::SqlValue;

const OPERATORS: &[&str] = &[
    "=", "!=", "<>", "<", "<=", ">", ">=", "LIKE", "NOT LIKE", "IN", "NOT IN", "BETWEEN",
    "NOT BETWEEN", "IS", "IS NOT",
];

/// SQL text and its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// SQL with dialect placeholders.
    pub sql: String,
    /// Parameters in the order their placeholders appear.
    pub params: Vec<SqlValue>,
}

/// Anything that compiles to a single statement.
pub trait Statement {
    /// Writes the statement through `compiler`.
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::QueryCompilation`] for malformed statements.
    fn compile_with(&self, compiler: &mut Compiler<'_>) -> Result<String>;

    /// Compiles with a fresh [`Compiler`].
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::QueryCompilation`] for malformed statements.
    fn compile(&self, dialect: &dyn Dialect, prefix: &str) -> Result<CompiledQuery> {
        let mut compiler = Compiler::new(dialect, prefix);
        let sql = self.compile_with(&mut compiler)?;
        Ok(compiler.finish(sql))
    }
}

/// Compiles builders into SQL. Holds the quoter and the parameters bound
/// so far; one compiler per statement.
#[derive(Debug)]
pub struct Compiler<'a> {
    quoter: Quoter<'a>,
    params: Vec<SqlValue>,
}

impl<'a> Compiler<'a> {
    /// Creates a compiler for `dialect` with table `prefix`.
    #[must_use]
    pub fn new(dialect: &'a dyn Dialect, prefix: &str) -> Self {
        Self {
            quoter: Quoter::new(dialect, prefix),
            params: Vec::new(),
        }
    }

    /// The underlying quoter.
    pub fn quoter(&mut self) -> &mut Quoter<'a> {
        &mut self.quoter
    }

    /// Finishes compilation.
    #[must_use]
    pub fn finish(self, sql: String) -> CompiledQuery {
        CompiledQuery {
            sql,
            params: self.params,
        }
    }

    /// Binds a parameter and returns its placeholder.
    pub fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        self.quoter.dialect().placeholder(self.params.len())
    }

    /// Compiles a SELECT.
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::QueryCompilation`] for malformed identifiers or
    /// predicates.
    pub fn select(&mut self, query: &SelectQuery) -> Result<String> {
        // Aliases declared in FROM and JOIN must be known before the column
        // list is quoted.
        if let Source::Table(ref table) = query.source {
            self.quoter.quote(table, true)?;
        }
        for join in &query.joins {
            self.quoter.quote(&join.table, true)?;
        }

        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }
        let columns = query
            .columns
            .iter()
            .map(|c| self.quoter.quote(c, false))
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(&columns.join(", "));

        sql.push_str(" FROM ");
        match query.source {
            Source::Table(ref table) => sql.push_str(&self.quoter.quote(table, true)?),
            Source::Query(ref inner, ref alias) => {
                let inner = self.select(inner)?;
                let alias = self.quoter.dialect().identifier(alias);
                sql.push_str(&format!("({inner}) AS {alias}"));
            }
        }

        for join in &query.joins {
            sql.push(' ');
            sql.push_str(join.kind.as_sql());
            sql.push(' ');
            sql.push_str(&self.quoter.quote(&join.table, true)?);
            if !join.on.is_empty() {
                sql.push_str(" ON ");
                sql.push_str(&self.predicates(&join.on)?);
            }
        }

        if !query.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates(&query.wheres)?);
        }

        if !query.group_by.is_empty() {
            let group = query
                .group_by
                .iter()
                .map(|c| self.quoter.quote(c, false))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&group.join(", "));
        }

        if !query.havings.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&self.predicates(&query.havings)?);
        }

        if !query.order_by.is_empty() {
            let order = query
                .order_by
                .iter()
                .map(|(column, direction)| {
                    Ok(format!("{} {}", self.quoter.quote(column, false)?, direction.as_sql()))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        sql.push_str(&self.quoter.dialect().limit_offset(query.limit, query.offset));
        Ok(sql)
    }

    /// Compiles an INSERT.
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::QueryCompilation`] when there is no row to
    /// insert or a row does not match the column list.
    pub fn insert(&mut self, query: &InsertQuery) -> Result<String> {
        let table = self.quoter.quote(&query.table, true)?;
        if query.columns.is_empty() {
            if !query.rows.is_empty() && query.rows.iter().all(Vec::is_empty) {
                return Ok(self.quoter.dialect().insert_default_values(&table));
            }
            return Err(DbalError::QueryCompilation(format!(
                "insert into {} has no columns",
                query.table
            )));
        }
        if query.rows.is_empty() {
            return Err(DbalError::QueryCompilation(format!(
                "insert into {} has no values",
                query.table
            )));
        }

        let columns = query
            .columns
            .iter()
            .map(|c| self.quoter.quote(c, false))
            .collect::<Result<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(query.rows.len());
        for row in &query.rows {
            if row.len() != query.columns.len() {
                return Err(DbalError::QueryCompilation(format!(
                    "insert into {} expects {} values per row, got {}",
                    query.table,
                    query.columns.len(),
                    row.len()
                )));
            }
            let placeholders: Vec<String> = row.iter().map(|v| self.bind(v.clone())).collect();
            rows.push(format!("({})", placeholders.join(", ")));
        }

        Ok(format!(
            "INSERT INTO {table} ({}) VALUES {}",
            columns.join(", "),
            rows.join(", ")
        ))
    }

    /// Compiles an UPDATE.
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::QueryCompilation`] when no column is set.
    pub fn update(&mut self, query: &UpdateQuery) -> Result<String> {
        let table = self.quoter.quote(&query.table, true)?;
        if query.values.is_empty() {
            return Err(DbalError::QueryCompilation(format!(
                "update of {} sets no values",
                query.table
            )));
        }

        let mut assignments = Vec::with_capacity(query.values.len());
        for (column, operand) in &query.values {
            let column = self.quoter.quote(column, false)?;
            let value = match operand {
                Operand::Value(value) => self.bind(value.clone()),
                Operand::Identifier(other) => self.quoter.quote(other, false)?,
                Operand::Raw(expression) => expression.clone(),
                Operand::Query(sub) => format!("({})", self.select(sub)?),
                Operand::List(_) | Operand::Range(..) => {
                    return Err(DbalError::QueryCompilation(format!(
                        "unsupported value for {column}"
                    )));
                }
            };
            assignments.push(format!("{column} = {value}"));
        }

        let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
        if !query.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates(&query.wheres)?);
        }
        Ok(sql)
    }

    /// Compiles a DELETE.
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::QueryCompilation`] for malformed predicates.
    pub fn delete(&mut self, query: &DeleteQuery) -> Result<String> {
        let mut sql = format!("DELETE FROM {}", self.quoter.quote(&query.table, true)?);
        if !query.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates(&query.wheres)?);
        }
        Ok(sql)
    }

    /// Compiles a predicate tree as a left fold, wrapping what came before
    /// whenever the connector changes.
    ///
    /// # Errors
    ///
    /// Returns [`DbalError::QueryCompilation`] for malformed predicates.
    pub fn predicates(&mut self, tree: &WhereTree) -> Result<String> {
        let mut sql = String::new();
        let mut previous: Option<Connector> = None;
        for (position, (connector, predicate)) in tree.nodes().iter().enumerate() {
            let fragment = self.predicate(predicate)?;
            if position == 0 {
                sql = fragment;
                continue;
            }
            if previous.is_some_and(|p| p != *connector) {
                sql = format!("({sql})");
            }
            sql = format!("{sql} {} {fragment}", connector.as_sql());
            previous = Some(*connector);
        }
        Ok(sql)
    }

    fn predicate(&mut self, predicate: &Predicate) -> Result<String> {
        match predicate {
            Predicate::Compare {
                column,
                operator,
                operand,
            } => self.comparison(column, operator, operand),
            Predicate::Raw { sql, params } => self.raw(sql, params),
            Predicate::Group(tree) => Ok(format!("({})", self.predicates(tree)?)),
            Predicate::Not(tree) => Ok(format!("NOT ({})", self.predicates(tree)?)),
        }
    }

    fn comparison(&mut self, column: &str, operator: &str, operand: &Operand) -> Result<String> {
        let mut operator = operator.trim().to_ascii_uppercase();
        if !OPERATORS.contains(&operator.as_str()) {
            return Err(DbalError::QueryCompilation(format!(
                "unsupported operator: {operator}"
            )));
        }
        let column = self.quoter.quote(column, false)?;

        let rhs = match operand {
            Operand::Value(SqlValue::Null) => {
                let negated = matches!(operator.as_str(), "!=" | "<>" | "IS NOT");
                if negated || matches!(operator.as_str(), "=" | "IS") {
                    let is = if negated { "IS NOT" } else { "IS" };
                    return Ok(format!("{column} {is} NULL"));
                }
                self.bind(SqlValue::Null)
            }
            Operand::Value(value) => {
                let placeholder = self.bind(value.clone());
                if operator.ends_with("IN") {
                    format!("({placeholder})")
                } else {
                    placeholder
                }
            }
            Operand::Identifier(other) => self.quoter.quote(other, false)?,
            Operand::List(values) => {
                if values.is_empty() {
                    return Err(DbalError::QueryCompilation(format!(
                        "empty value list for {column}"
                    )));
                }
                let list_operator = match operator.as_str() {
                    "=" => Some("IN"),
                    "!=" | "<>" => Some("NOT IN"),
                    _ => None,
                };
                if let Some(list_operator) = list_operator {
                    operator = list_operator.to_string();
                }
                let placeholders: Vec<String> =
                    values.iter().map(|v| self.bind(v.clone())).collect();
                format!("({})", placeholders.join(", "))
            }
            Operand::Range(low, high) => {
                if !operator.ends_with("BETWEEN") {
                    return Err(DbalError::QueryCompilation(format!(
                        "range requires BETWEEN, got {operator}"
                    )));
                }
                let low = self.bind(low.clone());
                let high = self.bind(high.clone());
                format!("{low} AND {high}")
            }
            Operand::Query(query) => format!("({})", self.select(query)?),
            Operand::Raw(sql) => sql.clone(),
        };
        Ok(format!("{column} {operator} {rhs}"))
    }

    /// Rewrites `?` markers of a raw fragment into dialect placeholders.
    fn raw(&mut self, sql: &str, params: &[SqlValue]) -> Result<String> {
        let markers = sql.matches('?').count();
        if markers != params.len() {
            return Err(DbalError::QueryCompilation(format!(
                "fragment expects {markers} parameters, got {}",
                params.len()
            )));
        }
        let mut out = String::with_capacity(sql.len());
        let mut params = params.iter();
        for c in sql.chars() {
            if c == '?' {
                if let Some(value) = params.next() {
                    out.push_str(&self.bind(value.clone()));
                    continue;
                }
            }
            out.push(c);
        }
        Ok(out)
    }
}

impl Statement for SelectQuery {
    fn compile_with(&self, compiler: &mut Compiler<'_>) -> Result<String> {
        compiler.select(self)
    }
}

impl Statement for InsertQuery {
    fn compile_with(&self, compiler: &mut Compiler<'_>) -> Result<String> {
        compiler.insert(self)
    }
}

impl Statement for UpdateQuery {
    fn compile_with(&self, compiler: &mut Compiler<'_>) -> Result<String> {
        compiler.update(self)
    }
}

impl Statement for DeleteQuery {
    fn compile_with(&self, compiler: &mut Compiler<'_>) -> Result<String> {
        compiler.delete(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::query::{Aggregate, Direction, Filter};

    fn sqlite(statement: &impl Statement) -> CompiledQuery {
        statement.compile(&SqliteDialect::new(), "p_").unwrap()
    }

    #[test]
    fn connector_change_wraps_left_side() {
        let query = SelectQuery::from("users")
            .where_eq("a", 1)
            .where_eq("b", 2)
            .or_where_eq("c", 3);
        let compiled = sqlite(&query);
        assert_eq!(
            compiled.sql,
            "SELECT * FROM \"p_users\" WHERE (\"a\" = ? AND \"b\" = ?) OR \"c\" = ?"
        );
        assert_eq!(
            compiled.params,
            vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)]
        );
    }

    #[test]
    fn nested_groups_are_parenthesized() {
        let query = SelectQuery::from("users")
            .where_eq("status", "active")
            .where_group(|g| g.and("age", ">", 18).or("vip", "=", true))
            .where_not(|g| g.and("banned", "=", true));
        let compiled = sqlite(&query);
        assert_eq!(
            compiled.sql,
            "SELECT * FROM \"p_users\" WHERE \"status\" = ? AND (\"age\" > ? OR \"vip\" = ?) AND NOT (\"banned\" = ?)"
        );
        assert_eq!(compiled.params.len(), 4);
    }

    #[test]
    fn postgres_placeholders_follow_text_order() {
        let sub = SelectQuery::from("orders")
            .columns(&["user_id"])
            .where_("total", ">", 100);
        let query = SelectQuery::from("users AS u")
            .left_join("profiles AS pr", |on| on.on("pr.user_id", "=", "u.id").and("pr.kind", "=", "main"))
            .where_in_query("u.id", sub)
            .where_in("u.role", ["admin", "staff"]);
        let compiled = query.compile(&PostgresDialect::new(), "").unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM \"users\" AS \"u\" LEFT JOIN \"profiles\" AS \"pr\" ON \"pr\".\"user_id\" = \"u\".\"id\" AND \"pr\".\"kind\" = $1 WHERE \"u\".\"id\" IN (SELECT \"user_id\" FROM \"orders\" WHERE \"total\" > $2) AND \"u\".\"role\" IN ($3, $4)"
        );
        assert_eq!(
            compiled.params,
            vec![
                SqlValue::Text(String::from("main")),
                SqlValue::Int(100),
                SqlValue::Text(String::from("admin")),
                SqlValue::Text(String::from("staff")),
            ]
        );
    }

    #[test]
    fn aliases_in_columns_are_not_prefixed() {
        let query = SelectQuery::from("users AS u")
            .columns(&["u.id", "u.name"])
            .order_by("u.name", Direction::Desc)
            .limit(10)
            .offset(20);
        assert_eq!(
            sqlite(&query).sql,
            "SELECT \"u\".\"id\", \"u\".\"name\" FROM \"p_users\" AS \"u\" ORDER BY \"u\".\"name\" DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn null_comparisons() {
        let query = SelectQuery::from("users")
            .where_eq("deleted_at", SqlValue::Null)
            .where_("parent_id", "!=", None::<i64>)
            .where_null("x")
            .where_not_null("y");
        let compiled = sqlite(&query);
        assert_eq!(
            compiled.sql,
            "SELECT * FROM \"p_users\" WHERE \"deleted_at\" IS NULL AND \"parent_id\" IS NOT NULL AND \"x\" IS NULL AND \"y\" IS NOT NULL"
        );
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn between_and_raw() {
        let query = SelectQuery::from("events")
            .where_between("day", 1, 7)
            .where_raw("LENGTH(name) > ?", vec![SqlValue::Int(3)]);
        let compiled = query.compile(&PostgresDialect::new(), "").unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM \"events\" WHERE \"day\" BETWEEN $1 AND $2 AND LENGTH(name) > $3"
        );
    }

    #[test]
    fn rejects_bad_predicates() {
        let empty = SelectQuery::from("users").where_in("id", Vec::<i64>::new());
        assert!(matches!(
            empty.compile(&SqliteDialect::new(), ""),
            Err(DbalError::QueryCompilation(_))
        ));
        let bad_operator = SelectQuery::from("users").where_("id", "===", 1);
        assert!(bad_operator.compile(&SqliteDialect::new(), "").is_err());
        let raw = SelectQuery::from("users").where_raw("a = ? AND b = ?", vec![SqlValue::Int(1)]);
        assert!(raw.compile(&SqliteDialect::new(), "").is_err());
    }

    #[test]
    fn derived_aggregate() {
        let query = SelectQuery::from("orders")
            .group_by(&["user_id"])
            .where_eq("status", "paid")
            .count_query();
        assert_eq!(
            sqlite(&query).sql,
            "SELECT COUNT(*) AS \"aggregate\" FROM (SELECT * FROM \"p_orders\" WHERE \"status\" = ? GROUP BY \"user_id\") AS \"spire_aggregate\""
        );
    }

    #[test]
    fn derived_aggregate_projects_its_column() {
        let query = SelectQuery::from("accounts")
            .columns(&["id"])
            .limit(5)
            .aggregate(Aggregate::Sum, "accounts.balance");
        assert_eq!(
            sqlite(&query).sql,
            "SELECT SUM(\"balance\") AS \"aggregate\" FROM (SELECT \"id\", \"p_accounts\".\"balance\" FROM \"p_accounts\" LIMIT 5) AS \"spire_aggregate\""
        );

        let aliased = SelectQuery::from("accounts")
            .columns(&["id", "amount AS balance"])
            .limit(5)
            .aggregate(Aggregate::Max, "balance");
        assert_eq!(
            sqlite(&aliased).sql,
            "SELECT MAX(\"balance\") AS \"aggregate\" FROM (SELECT \"id\", \"amount\" AS \"balance\" FROM \"p_accounts\" LIMIT 5) AS \"spire_aggregate\""
        );
    }

    #[test]
    fn sqlite_offset_without_limit() {
        let query = SelectQuery::from("users").offset(5);
        assert_eq!(sqlite(&query).sql, "SELECT * FROM \"p_users\" LIMIT -1 OFFSET 5");
    }

    #[test]
    fn insert_rows() {
        let insert = InsertQuery::new("users")
            .columns(&["name", "age"])
            .values(vec![SqlValue::Text(String::from("a")), SqlValue::Int(1)])
            .values(vec![SqlValue::Text(String::from("b")), SqlValue::Int(2)]);
        let compiled = sqlite(&insert);
        assert_eq!(
            compiled.sql,
            "INSERT INTO \"p_users\" (\"name\", \"age\") VALUES (?, ?), (?, ?)"
        );
        assert_eq!(compiled.params.len(), 4);

        let mismatch = InsertQuery::new("users")
            .columns(&["name", "age"])
            .values(vec![SqlValue::Int(1)]);
        assert!(mismatch.compile(&SqliteDialect::new(), "").is_err());

        let defaults = InsertQuery::new("users").values(Vec::new());
        assert_eq!(sqlite(&defaults).sql, "INSERT INTO \"p_users\" DEFAULT VALUES");
    }

    #[test]
    fn update_and_delete() {
        let update = UpdateQuery::table("users")
            .set("name", "x")
            .set_raw("visits", "visits + 1")
            .set("name", "y")
            .where_eq("id", 5);
        let compiled = update.compile(&PostgresDialect::new(), "").unwrap();
        assert_eq!(
            compiled.sql,
            "UPDATE \"users\" SET \"name\" = $1, \"visits\" = visits + 1 WHERE \"id\" = $2"
        );
        assert_eq!(
            compiled.params,
            vec![SqlValue::Text(String::from("y")), SqlValue::Int(5)]
        );

        assert!(UpdateQuery::table("users")
            .compile(&SqliteDialect::new(), "")
            .is_err());

        let delete = DeleteQuery::from("users").where_in("id", [1, 2]);
        assert_eq!(
            sqlite(&delete).sql,
            "DELETE FROM \"p_users\" WHERE \"id\" IN (?, ?)"
        );
    }
}
