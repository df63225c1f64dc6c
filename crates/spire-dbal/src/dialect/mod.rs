//! Dialect-specific SQL generation.
//!
//! A dialect knows how a DBMS spells identifiers, placeholders, column
//! types and DDL. Everything here is synchronous and pure; the driver owns
//! the connection.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use std::fmt;

use crate::error::Result;
use crate::schema::{
    AbstractType, Column, DefaultValue, ForeignKey, Index, TableDiff, TableState,
    IDENTIFIER_LIMIT,
};

/// Abstract type information recovered from a native type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    /// Abstract type.
    pub abstract_type: AbstractType,
    /// Size argument, if any.
    pub size: Option<u32>,
    /// Precision argument, if any.
    pub precision: Option<u8>,
    /// Scale argument, if any.
    pub scale: Option<u8>,
}

impl TypeInfo {
    /// Type information without arguments.
    #[must_use]
    pub const fn plain(abstract_type: AbstractType) -> Self {
        Self {
            abstract_type,
            size: None,
            precision: None,
            scale: None,
        }
    }
}

/// Splits `VARCHAR(255)` into `("VARCHAR", [255])`.
#[must_use]
pub fn split_native_type(native: &str) -> (String, Vec<u32>) {
    let native = native.trim();
    match native.find('(') {
        Some(open) => {
            let name = native[..open].trim().to_ascii_uppercase();
            let args = native[open + 1..]
                .trim_end_matches(')')
                .split(',')
                .filter_map(|a| a.trim().parse().ok())
                .collect();
            (name, args)
        }
        None => (native.to_ascii_uppercase(), Vec::new()),
    }
}

/// Coerces a default value to the kind of value the column stores, so
/// declared and introspected defaults compare equal.
#[must_use]
pub fn normalize_default(default: &DefaultValue, abstract_type: AbstractType) -> DefaultValue {
    use AbstractType as T;
    match (abstract_type, default) {
        (T::Boolean, DefaultValue::Integer(n)) => DefaultValue::Bool(*n != 0),
        (
            T::Integer | T::TinyInteger | T::BigInteger,
            DefaultValue::Bool(b),
        ) => DefaultValue::Integer(i64::from(*b)),
        #[allow(clippy::cast_possible_truncation)]
        (T::Integer | T::TinyInteger | T::BigInteger, DefaultValue::Float(f))
            if f.fract() == 0.0 =>
        {
            DefaultValue::Integer(*f as i64)
        }
        #[allow(clippy::cast_precision_loss)]
        (T::Float | T::Double | T::Decimal, DefaultValue::Integer(n)) => {
            DefaultValue::Float(*n as f64)
        }
        (
            T::String | T::Text | T::TinyText | T::LongText | T::Enum,
            DefaultValue::Integer(n),
        ) => DefaultValue::String(n.to_string()),
        (
            T::String | T::Text | T::TinyText | T::LongText | T::Enum,
            DefaultValue::Float(f),
        ) => DefaultValue::String(f.to_string()),
        (_, other) => other.clone(),
    }
}

/// Parses a default value as reported by introspection.
#[must_use]
pub fn parse_default(raw: &str, abstract_type: AbstractType) -> DefaultValue {
    use AbstractType as T;
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("NULL") {
        return DefaultValue::Null;
    }
    // Quoted numbers of numeric columns are still numbers.
    let (text, quoted) = if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        (raw[1..raw.len() - 1].replace("''", "'"), true)
    } else {
        (raw.to_string(), false)
    };
    let fallback = |text: String| {
        if quoted {
            DefaultValue::String(text)
        } else {
            DefaultValue::Expression(text)
        }
    };
    match abstract_type {
        T::Boolean => match text.to_ascii_uppercase().as_str() {
            "1" | "TRUE" => DefaultValue::Bool(true),
            "0" | "FALSE" => DefaultValue::Bool(false),
            _ => fallback(text),
        },
        T::Integer | T::TinyInteger | T::BigInteger | T::Primary | T::BigPrimary => {
            text.parse().map_or_else(|_| fallback(text.clone()), DefaultValue::Integer)
        }
        T::Float | T::Double | T::Decimal => {
            text.parse().map_or_else(|_| fallback(text.clone()), DefaultValue::Float)
        }
        _ => fallback(text),
    }
}

/// SQL dialect of one DBMS.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the identifier quote character.
    fn quote_char(&self) -> char {
        '"'
    }

    /// Quotes a single identifier. `*` is passed through.
    fn identifier(&self, name: &str) -> String {
        if name == "*" {
            return String::from("*");
        }
        let q = self.quote_char();
        let escaped = name.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// Placeholder for the `position`-th (1-based) bound parameter.
    fn placeholder(&self, _position: usize) -> String {
        String::from("?")
    }

    /// Longest identifier the DBMS accepts.
    fn identifier_limit(&self) -> usize {
        IDENTIFIER_LIMIT
    }

    /// Nested transactions can be emulated with savepoints.
    fn supports_savepoints(&self) -> bool {
        true
    }

    /// Foreign keys can be added to an existing table.
    fn supports_foreign_key_alteration(&self) -> bool {
        true
    }

    /// Native type for an abstract column.
    fn native_type(&self, column: &Column) -> String;

    /// Abstract type for a native type string.
    fn parse_native_type(&self, native: &str) -> TypeInfo;

    /// Adjusts a declared column to what this DBMS can store, so the
    /// introspected column compares equal to it.
    fn normalize_column(&self, column: &Column) -> Column {
        let mut column = column.clone();
        if let Some(ref default) = column.default {
            column.default = Some(normalize_default(default, column.abstract_type));
        }
        column
    }

    /// Renders a default value.
    fn render_default(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Null => String::from("NULL"),
            DefaultValue::Bool(b) => String::from(if *b { "TRUE" } else { "FALSE" }),
            DefaultValue::Integer(n) => n.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::Expression(expr) => expr.clone(),
        }
    }

    /// Column definition used by `CREATE TABLE` and `ADD COLUMN`.
    fn column_definition(&self, column: &Column) -> String {
        let mut sql = format!(
            "{} {}",
            self.identifier(&column.name),
            self.native_type(column)
        );
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(ref default) = column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&self.render_default(default));
        }
        sql
    }

    /// Table level primary key clause, if one is needed.
    fn primary_key_definition(&self, state: &TableState) -> Option<String> {
        if state.primary_keys.is_empty() {
            return None;
        }
        let columns: Vec<String> = state
            .primary_keys
            .iter()
            .map(|c| self.identifier(c))
            .collect();
        Some(format!("PRIMARY KEY ({})", columns.join(", ")))
    }

    /// `CONSTRAINT .. FOREIGN KEY .. REFERENCES ..` clause.
    fn foreign_key_definition(&self, table: &str, fk: &ForeignKey) -> String {
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.identifier(&fk.name_for(table, self.identifier_limit())),
            self.identifier(&fk.column),
            self.identifier(&fk.foreign_table),
            self.identifier(&fk.foreign_key)
        );
        sql.push_str(" ON DELETE ");
        sql.push_str(fk.on_delete.as_sql());
        sql.push_str(" ON UPDATE ");
        sql.push_str(fk.on_update.as_sql());
        sql
    }

    /// `CREATE TABLE` followed by one `CREATE INDEX` per index. Only the
    /// given foreign keys are created inline.
    fn create_table(&self, state: &TableState, foreign_keys: &[&ForeignKey]) -> Vec<String> {
        let mut lines: Vec<String> = state
            .columns
            .values()
            .map(|c| format!("    {}", self.column_definition(c)))
            .collect();
        if let Some(primary) = self.primary_key_definition(state) {
            lines.push(format!("    {primary}"));
        }
        for fk in foreign_keys {
            lines.push(format!("    {}", self.foreign_key_definition(&state.name, fk)));
        }

        let mut statements = vec![format!(
            "CREATE TABLE {} (\n{}\n)",
            self.identifier(&state.name),
            lines.join(",\n")
        )];
        for index in &state.indexes {
            statements.push(self.create_index(&state.name, index));
        }
        statements
    }

    /// `DROP TABLE`.
    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.identifier(table))
    }

    /// `ALTER TABLE .. ADD COLUMN`.
    fn add_column(&self, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.identifier(table),
            self.column_definition(column)
        )
    }

    /// Statements changing `current` into `desired`.
    fn alter_column(&self, table: &str, current: &Column, desired: &Column) -> Vec<String>;

    /// `ALTER TABLE .. DROP COLUMN`.
    fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.identifier(table),
            self.identifier(column)
        )
    }

    /// `CREATE [UNIQUE] INDEX`.
    fn create_index(&self, table: &str, index: &Index) -> String {
        format!("CREATE {}", index.sql_statement(self, table, true))
    }

    /// `DROP INDEX`.
    fn drop_index(&self, _table: &str, name: &str) -> String {
        format!("DROP INDEX {}", self.identifier(name))
    }

    /// `ALTER TABLE .. ADD CONSTRAINT .. FOREIGN KEY`.
    fn add_foreign_key(&self, table: &str, fk: &ForeignKey) -> String {
        format!(
            "ALTER TABLE {} ADD {}",
            self.identifier(table),
            self.foreign_key_definition(table, fk)
        )
    }

    /// `ALTER TABLE .. DROP CONSTRAINT`.
    fn drop_foreign_key(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.identifier(table),
            self.identifier(name)
        )
    }

    /// Connection settings wrapped around the transaction that applies
    /// `diff`: the first list runs before it, the second after it.
    fn alter_table_guards(&self, _diff: &TableDiff) -> (Vec<String>, Vec<String>) {
        (Vec::new(), Vec::new())
    }

    /// Statements applying `diff` to an existing table. Foreign keys and
    /// indexes go first so columns can be dropped, and come back last so
    /// they see the new columns.
    fn alter_table(
        &self,
        _current: &TableState,
        desired: &TableState,
        diff: &TableDiff,
    ) -> Result<Vec<String>> {
        let table = desired.name.as_str();
        let mut statements = Vec::new();
        let name_of = |name: &Option<String>| name.clone().unwrap_or_default();

        for fk in diff
            .dropped_foreign_keys
            .iter()
            .chain(diff.altered_foreign_keys.iter().map(|(old, _)| old))
        {
            statements.push(self.drop_foreign_key(table, &name_of(&fk.name)));
        }
        for index in diff
            .dropped_indexes
            .iter()
            .chain(diff.altered_indexes.iter().map(|(old, _)| old))
        {
            statements.push(self.drop_index(table, &name_of(&index.name)));
        }
        for column in &diff.dropped_columns {
            statements.push(self.drop_column(table, &column.name));
        }
        for column in &diff.added_columns {
            statements.push(self.add_column(table, column));
        }
        for (old, new) in &diff.altered_columns {
            statements.extend(self.alter_column(table, old, new));
        }
        for index in diff
            .added_indexes
            .iter()
            .chain(diff.altered_indexes.iter().map(|(_, new)| new))
        {
            statements.push(self.create_index(table, index));
        }
        for fk in diff
            .added_foreign_keys
            .iter()
            .chain(diff.altered_foreign_keys.iter().map(|(_, new)| new))
        {
            statements.push(self.add_foreign_key(table, fk));
        }
        Ok(statements)
    }

    /// Empties a table.
    fn truncate(&self, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.identifier(table))
    }

    /// ` LIMIT .. OFFSET ..` suffix, empty when neither is set.
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }

    /// Insert statement for a row with no explicit values. The table is
    /// already quoted.
    fn insert_default_values(&self, quoted_table: &str) -> String {
        format!("INSERT INTO {quoted_table} DEFAULT VALUES")
    }

    /// `SAVEPOINT` statement for the given nesting level.
    fn savepoint(&self, level: usize) -> String {
        format!("SAVEPOINT {}", self.identifier(&format!("SVP{level}")))
    }

    /// `RELEASE SAVEPOINT` statement.
    fn release_savepoint(&self, level: usize) -> String {
        format!("RELEASE SAVEPOINT {}", self.identifier(&format!("SVP{level}")))
    }

    /// `ROLLBACK TO SAVEPOINT` statement.
    fn rollback_savepoint(&self, level: usize) -> String {
        format!(
            "ROLLBACK TO SAVEPOINT {}",
            self.identifier(&format!("SVP{level}"))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_native_types() {
        assert_eq!(
            split_native_type("varchar(255)"),
            (String::from("VARCHAR"), vec![255])
        );
        assert_eq!(
            split_native_type("NUMERIC(10, 2)"),
            (String::from("NUMERIC"), vec![10, 2])
        );
        assert_eq!(split_native_type("TEXT"), (String::from("TEXT"), vec![]));
    }

    #[test]
    fn parses_defaults_by_type() {
        assert_eq!(parse_default("NULL", AbstractType::Text), DefaultValue::Null);
        assert_eq!(
            parse_default("'it''s'", AbstractType::String),
            DefaultValue::String(String::from("it's"))
        );
        assert_eq!(parse_default("1", AbstractType::Boolean), DefaultValue::Bool(true));
        assert_eq!(parse_default("42", AbstractType::Integer), DefaultValue::Integer(42));
        assert_eq!(parse_default("'7'", AbstractType::Integer), DefaultValue::Integer(7));
        assert_eq!(parse_default("1", AbstractType::Double), DefaultValue::Float(1.0));
        assert_eq!(
            parse_default("CURRENT_TIMESTAMP", AbstractType::Datetime),
            DefaultValue::Expression(String::from("CURRENT_TIMESTAMP"))
        );
    }

    #[test]
    fn normalizes_defaults_to_column_kind() {
        assert_eq!(
            normalize_default(&DefaultValue::Integer(1), AbstractType::Boolean),
            DefaultValue::Bool(true)
        );
        assert_eq!(
            normalize_default(&DefaultValue::Integer(5), AbstractType::String),
            DefaultValue::String(String::from("5"))
        );
        assert_eq!(
            normalize_default(&DefaultValue::Integer(2), AbstractType::Float),
            DefaultValue::Float(2.0)
        );
    }

    #[test]
    fn identifier_escapes_quote_char() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(dialect.identifier("*"), "*");
        assert_eq!(MySqlDialect::new().identifier("users"), "`users`");
    }
}
