//! SQLite dialect.

use super::{split_native_type, Dialect, TypeInfo};
use crate::error::Result;
use crate::schema::{AbstractType, Column, DefaultValue, TableDiff, TableState};

/// SQLite dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// `ALTER TABLE` in SQLite can only add columns. Everything else goes
    /// through a table rebuild.
    fn needs_rebuild(diff: &TableDiff) -> bool {
        !diff.altered_columns.is_empty()
            || !diff.dropped_columns.is_empty()
            || !diff.added_foreign_keys.is_empty()
            || !diff.altered_foreign_keys.is_empty()
            || !diff.dropped_foreign_keys.is_empty()
            || diff.primary_keys_changed
            || diff.added_columns.iter().any(|c| {
                c.abstract_type.is_primary()
                    || (!c.nullable && matches!(c.default, None | Some(DefaultValue::Null)))
            })
    }

    /// Create a temporary table, copy the common columns, swap it in.
    fn rebuild(&self, current: &TableState, desired: &TableState) -> Vec<String> {
        let desired = desired.resolved(self.identifier_limit());
        let temporary = format!("spire_tmp_{}", desired.name);

        let mut temporary_state = desired.clone();
        temporary_state.name.clone_from(&temporary);
        temporary_state.indexes.clear();
        let foreign_keys: Vec<_> = desired.foreign_keys.iter().collect();

        let mut statements = self.create_table(&temporary_state, &foreign_keys);

        let common: Vec<String> = desired
            .columns
            .keys()
            .filter(|name| current.columns.contains_key(*name))
            .map(|name| self.identifier(name))
            .collect();
        if !common.is_empty() {
            let columns = common.join(", ");
            statements.push(format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                self.identifier(&temporary),
                self.identifier(&desired.name)
            ));
        }

        statements.push(self.drop_table(&desired.name));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.identifier(&temporary),
            self.identifier(&desired.name)
        ));
        for index in &desired.indexes {
            statements.push(self.create_index(&desired.name, index));
        }
        statements
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_foreign_key_alteration(&self) -> bool {
        false
    }

    fn native_type(&self, column: &Column) -> String {
        use AbstractType as T;
        match column.abstract_type {
            T::Primary | T::BigPrimary | T::Integer => String::from("INTEGER"),
            T::Boolean => String::from("BOOLEAN"),
            T::TinyInteger => String::from("TINYINT"),
            T::BigInteger => String::from("BIGINT"),
            T::String | T::Enum => format!("VARCHAR({})", column.size.unwrap_or(255)),
            T::Text => String::from("TEXT"),
            T::TinyText => String::from("TINYTEXT"),
            T::LongText => String::from("LONGTEXT"),
            T::Double => String::from("DOUBLE"),
            T::Float => String::from("FLOAT"),
            T::Decimal => format!(
                "NUMERIC({}, {})",
                column.precision.unwrap_or(10),
                column.scale.unwrap_or(0)
            ),
            T::Datetime => String::from("DATETIME"),
            T::Date => String::from("DATE"),
            T::Time => String::from("TIME"),
            T::Timestamp => String::from("TIMESTAMP"),
            T::Binary => String::from("BLOB"),
            T::TinyBinary => String::from("TINYBLOB"),
            T::LongBinary => String::from("LONGBLOB"),
            T::Json => String::from("JSON"),
        }
    }

    fn parse_native_type(&self, native: &str) -> TypeInfo {
        use AbstractType as T;
        let (name, args) = split_native_type(native);
        let plain = TypeInfo::plain;
        match name.as_str() {
            "INTEGER" | "INT" | "MEDIUMINT" => plain(T::Integer),
            "BOOLEAN" | "BOOL" => plain(T::Boolean),
            "TINYINT" | "SMALLINT" => plain(T::TinyInteger),
            "BIGINT" => plain(T::BigInteger),
            "VARCHAR" | "CHARACTER" | "CHAR" | "NVARCHAR" | "NCHAR" => TypeInfo {
                size: Some(args.first().copied().unwrap_or(255)),
                ..plain(T::String)
            },
            "TINYTEXT" => plain(T::TinyText),
            "LONGTEXT" => plain(T::LongText),
            "DOUBLE" | "REAL" | "DOUBLE PRECISION" => plain(T::Double),
            "FLOAT" => plain(T::Float),
            "NUMERIC" | "DECIMAL" => TypeInfo {
                precision: args.first().and_then(|p| u8::try_from(*p).ok()),
                scale: args.get(1).and_then(|s| u8::try_from(*s).ok()),
                ..plain(T::Decimal)
            },
            "DATETIME" => plain(T::Datetime),
            "DATE" => plain(T::Date),
            "TIME" => plain(T::Time),
            "TIMESTAMP" => plain(T::Timestamp),
            "BLOB" => plain(T::Binary),
            "TINYBLOB" => plain(T::TinyBinary),
            "LONGBLOB" => plain(T::LongBinary),
            "JSON" => plain(T::Json),
            _ => plain(T::Text),
        }
    }

    fn normalize_column(&self, column: &Column) -> Column {
        let mut column = column.clone();
        match column.abstract_type {
            AbstractType::BigPrimary => column.abstract_type = AbstractType::Primary,
            AbstractType::Enum => {
                column.abstract_type = AbstractType::String;
                column.size = Some(column.size.unwrap_or(255));
                column.enum_values.clear();
            }
            _ => {}
        }
        if column.abstract_type.is_primary() {
            column.nullable = false;
            column.default = None;
        }
        if let Some(ref default) = column.default {
            column.default = Some(super::normalize_default(default, column.abstract_type));
        }
        column
    }

    fn render_default(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Bool(b) => String::from(if *b { "1" } else { "0" }),
            DefaultValue::Null => String::from("NULL"),
            DefaultValue::Integer(n) => n.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::Expression(expr) => expr.clone(),
        }
    }

    fn column_definition(&self, column: &Column) -> String {
        if column.abstract_type.is_primary() {
            return format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL",
                self.identifier(&column.name)
            );
        }
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

    fn primary_key_definition(&self, state: &TableState) -> Option<String> {
        let inline = state
            .columns
            .values()
            .any(|c| c.abstract_type.is_primary());
        if inline || state.primary_keys.is_empty() {
            return None;
        }
        let columns: Vec<String> = state
            .primary_keys
            .iter()
            .map(|c| self.identifier(c))
            .collect();
        Some(format!("PRIMARY KEY ({})", columns.join(", ")))
    }

    fn alter_column(&self, _table: &str, _current: &Column, _desired: &Column) -> Vec<String> {
        // Handled by the rebuild in `alter_table`.
        Vec::new()
    }

    /// Foreign key enforcement is off during a rebuild. SQLite ignores the
    /// pragma inside a transaction.
    fn alter_table_guards(&self, diff: &TableDiff) -> (Vec<String>, Vec<String>) {
        if Self::needs_rebuild(diff) {
            (
                vec![String::from("PRAGMA foreign_keys = OFF")],
                vec![String::from("PRAGMA foreign_keys = ON")],
            )
        } else {
            (Vec::new(), Vec::new())
        }
    }

    fn alter_table(
        &self,
        current: &TableState,
        desired: &TableState,
        diff: &TableDiff,
    ) -> Result<Vec<String>> {
        if Self::needs_rebuild(diff) {
            return Ok(self.rebuild(current, desired));
        }

        let table = desired.name.as_str();
        let mut statements = Vec::new();
        for index in diff
            .dropped_indexes
            .iter()
            .chain(diff.altered_indexes.iter().map(|(old, _)| old))
        {
            statements.push(self.drop_index(table, index.name.as_deref().unwrap_or_default()));
        }
        for column in &diff.added_columns {
            statements.push(self.add_column(table, column));
        }
        for index in diff
            .added_indexes
            .iter()
            .chain(diff.altered_indexes.iter().map(|(_, new)| new))
        {
            statements.push(self.create_index(table, index));
        }
        Ok(statements)
    }

    fn truncate(&self, table: &str) -> String {
        format!("DELETE FROM {}", self.identifier(table))
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ForeignKey, Index, TableSchema, IDENTIFIER_LIMIT};

    fn posts() -> TableSchema {
        let mut table = TableSchema::new("posts", "");
        table.primary("id");
        table.integer("author_id");
        table.string("title", 255).nullable();
        table
    }

    #[test]
    fn creates_table_with_inline_primary_key() {
        let dialect = SqliteDialect::new();
        let statements = dialect.create_table(posts().declared(), &[]);
        assert_eq!(
            statements,
            vec![String::from(
                "CREATE TABLE \"posts\" (\n    \"id\" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,\n    \"author_id\" INTEGER NOT NULL,\n    \"title\" VARCHAR(255)\n)"
            )]
        );
    }

    #[test]
    fn creates_indexes_and_inline_foreign_keys() {
        let dialect = SqliteDialect::new();
        let mut table = posts();
        table.index(&["author_id"]);
        let fk = ForeignKey::new("author_id", "users", "id");

        let statements = dialect.create_table(table.declared(), &[&fk]);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains(
            "CONSTRAINT \"posts_foreign_author_id\" FOREIGN KEY (\"author_id\") REFERENCES \"users\" (\"id\") ON DELETE NO ACTION ON UPDATE NO ACTION"
        ));
        assert_eq!(
            statements[1],
            "CREATE INDEX \"posts_index_author_id_index\" ON \"posts\" (\"author_id\")"
        );
    }

    #[test]
    fn normalizes_unsupported_types() {
        let dialect = SqliteDialect::new();
        let mut column = Column::new("state", AbstractType::Enum);
        column.enum_values = vec![String::from("draft"), String::from("published")];
        column.size = Some(9);
        let normalized = dialect.normalize_column(&column);
        assert_eq!(normalized.abstract_type, AbstractType::String);
        assert_eq!(normalized.size, Some(9));
        assert!(normalized.enum_values.is_empty());

        let big = dialect.normalize_column(&Column::new("id", AbstractType::BigPrimary));
        assert_eq!(big.abstract_type, AbstractType::Primary);
    }

    #[test]
    fn native_types_round_trip() {
        let dialect = SqliteDialect::new();
        for abstract_type in [
            AbstractType::Integer,
            AbstractType::Boolean,
            AbstractType::BigInteger,
            AbstractType::Text,
            AbstractType::LongText,
            AbstractType::Double,
            AbstractType::Datetime,
            AbstractType::Binary,
            AbstractType::Json,
        ] {
            let column = Column::new("c", abstract_type);
            let info = dialect.parse_native_type(&dialect.native_type(&column));
            assert_eq!(info.abstract_type, abstract_type);
        }
        let info = dialect.parse_native_type("VARCHAR(32)");
        assert_eq!(info.abstract_type, AbstractType::String);
        assert_eq!(info.size, Some(32));
    }

    #[test]
    fn adding_nullable_column_is_a_plain_alter() {
        let dialect = SqliteDialect::new();
        let mut current = TableState::new("posts");
        current
            .columns
            .insert(String::from("id"), Column::new("id", AbstractType::Primary));
        current.primary_keys.push(String::from("id"));

        let mut table = TableSchema::new("posts", "");
        table.set_current(Some(current.clone()));
        table.text("body").nullable();
        let desired = table.desired();
        let diff = table.diff(IDENTIFIER_LIMIT);

        let statements = dialect.alter_table(&current, &desired, &diff).unwrap();
        assert_eq!(
            statements,
            vec![String::from("ALTER TABLE \"posts\" ADD COLUMN \"body\" TEXT")]
        );
        assert_eq!(dialect.alter_table_guards(&diff), (Vec::new(), Vec::new()));
    }

    #[test]
    fn dropping_a_column_rebuilds_the_table() {
        let dialect = SqliteDialect::new();
        let mut current = TableState::new("posts");
        current
            .columns
            .insert(String::from("id"), Column::new("id", AbstractType::Primary));
        current
            .columns
            .insert(String::from("legacy"), Column::new("legacy", AbstractType::Text));
        current.primary_keys.push(String::from("id"));
        let mut index = Index::new(&["legacy"]);
        index.named("posts_index_legacy_index");
        current.indexes.push(index);

        let mut table = TableSchema::new("posts", "");
        table.set_current(Some(current.clone()));
        table.drop_column("legacy");
        let desired = table.desired();
        let diff = table.diff(IDENTIFIER_LIMIT);

        let statements = dialect.alter_table(&current, &desired, &diff).unwrap();
        assert!(statements[0].starts_with("CREATE TABLE \"spire_tmp_posts\""));
        assert_eq!(
            statements[1],
            "INSERT INTO \"spire_tmp_posts\" (\"id\") SELECT \"id\" FROM \"posts\""
        );
        assert_eq!(statements[2], "DROP TABLE \"posts\"");
        assert_eq!(
            statements[3],
            "ALTER TABLE \"spire_tmp_posts\" RENAME TO \"posts\""
        );
        assert_eq!(statements.len(), 4);

        let (before, after) = dialect.alter_table_guards(&diff);
        assert_eq!(before, vec!["PRAGMA foreign_keys = OFF"]);
        assert_eq!(after, vec!["PRAGMA foreign_keys = ON"]);
    }

    #[test]
    fn offset_without_limit() {
        let dialect = SqliteDialect::new();
        assert_eq!(dialect.limit_offset(None, Some(5)), " LIMIT -1 OFFSET 5");
        assert_eq!(dialect.limit_offset(Some(2), None), " LIMIT 2");
        assert_eq!(dialect.truncate("posts"), "DELETE FROM \"posts\"");
    }
}
