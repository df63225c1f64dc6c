//! MySQL dialect.

use super::{split_native_type, Dialect, TypeInfo};
use crate::schema::{AbstractType, Column, DefaultValue};

/// MySQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn native_type(&self, column: &Column) -> String {
        use AbstractType as T;
        match column.abstract_type {
            T::Primary => String::from("INT(11)"),
            T::BigPrimary => String::from("BIGINT(20)"),
            T::Boolean => String::from("TINYINT(1)"),
            T::Integer => String::from("INT(11)"),
            T::TinyInteger => String::from("TINYINT(4)"),
            T::BigInteger => String::from("BIGINT(20)"),
            T::String => format!("VARCHAR({})", column.size.unwrap_or(255)),
            T::Text => String::from("TEXT"),
            T::TinyText => String::from("TINYTEXT"),
            T::LongText => String::from("LONGTEXT"),
            T::Double => String::from("DOUBLE"),
            T::Float => String::from("FLOAT"),
            T::Decimal => format!(
                "DECIMAL({}, {})",
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
            T::Enum => {
                let values: Vec<String> = column
                    .enum_values
                    .iter()
                    .map(|v| format!("'{}'", v.replace('\'', "''")))
                    .collect();
                format!("ENUM({})", values.join(", "))
            }
        }
    }

    fn parse_native_type(&self, native: &str) -> TypeInfo {
        use AbstractType as T;
        let (name, args) = split_native_type(native);
        let plain = TypeInfo::plain;
        match (name.as_str(), args.first().copied()) {
            ("TINYINT", Some(1)) => plain(T::Boolean),
            ("TINYINT" | "SMALLINT", _) => plain(T::TinyInteger),
            ("INT" | "INTEGER" | "MEDIUMINT", _) => plain(T::Integer),
            ("BIGINT", _) => plain(T::BigInteger),
            ("VARCHAR" | "CHAR", size) => TypeInfo {
                size: Some(size.unwrap_or(255)),
                ..plain(T::String)
            },
            ("TINYTEXT", _) => plain(T::TinyText),
            ("LONGTEXT" | "MEDIUMTEXT", _) => plain(T::LongText),
            ("DOUBLE", _) => plain(T::Double),
            ("FLOAT", _) => plain(T::Float),
            ("DECIMAL" | "NUMERIC", _) => TypeInfo {
                precision: args.first().and_then(|p| u8::try_from(*p).ok()),
                scale: args.get(1).and_then(|s| u8::try_from(*s).ok()),
                ..plain(T::Decimal)
            },
            ("DATETIME", _) => plain(T::Datetime),
            ("DATE", _) => plain(T::Date),
            ("TIME", _) => plain(T::Time),
            ("TIMESTAMP", _) => plain(T::Timestamp),
            ("BLOB", _) => plain(T::Binary),
            ("TINYBLOB", _) => plain(T::TinyBinary),
            ("LONGBLOB" | "MEDIUMBLOB", _) => plain(T::LongBinary),
            ("JSON", _) => plain(T::Json),
            ("ENUM", _) => plain(T::Enum),
            _ => plain(T::Text),
        }
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
        let mut sql = format!(
            "{} {}",
            self.identifier(&column.name),
            self.native_type(column)
        );
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if column.abstract_type.is_primary() {
            sql.push_str(" AUTO_INCREMENT");
        } else if let Some(ref default) = column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&self.render_default(default));
        }
        sql
    }

    fn alter_column(&self, table: &str, current: &Column, desired: &Column) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} CHANGE {} {}",
            self.identifier(table),
            self.identifier(&current.name),
            self.column_definition(desired)
        )]
    }

    fn drop_index(&self, table: &str, name: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.identifier(name),
            self.identifier(table)
        )
    }

    fn drop_foreign_key(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.identifier(table),
            self.identifier(name)
        )
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, Some(offset)) => format!(" LIMIT 18446744073709551615 OFFSET {offset}"),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
        }
    }

    fn insert_default_values(&self, quoted_table: &str) -> String {
        format!("INSERT INTO {quoted_table} () VALUES ()")
    }
}
