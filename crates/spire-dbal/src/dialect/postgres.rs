//! PostgreSQL dialect.

use super::{split_native_type, Dialect, TypeInfo};
use crate::schema::{AbstractType, Column};

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn enum_check(&self, column: &Column) -> Option<String> {
        if column.abstract_type != AbstractType::Enum || column.enum_values.is_empty() {
            return None;
        }
        let values: Vec<String> = column
            .enum_values
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect();
        Some(format!(
            "CHECK ({} IN ({}))",
            self.identifier(&column.name),
            values.join(", ")
        ))
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn identifier_limit(&self) -> usize {
        63
    }

    fn native_type(&self, column: &Column) -> String {
        use AbstractType as T;
        match column.abstract_type {
            T::Primary => String::from("SERIAL"),
            T::BigPrimary => String::from("BIGSERIAL"),
            T::Boolean => String::from("BOOLEAN"),
            T::Integer => String::from("INTEGER"),
            T::TinyInteger => String::from("SMALLINT"),
            T::BigInteger => String::from("BIGINT"),
            T::String | T::Enum => format!("CHARACTER VARYING({})", column.size.unwrap_or(255)),
            T::Text | T::TinyText | T::LongText => String::from("TEXT"),
            T::Double => String::from("DOUBLE PRECISION"),
            T::Float => String::from("REAL"),
            T::Decimal => format!(
                "NUMERIC({}, {})",
                column.precision.unwrap_or(10),
                column.scale.unwrap_or(0)
            ),
            T::Datetime | T::Timestamp => String::from("TIMESTAMP WITHOUT TIME ZONE"),
            T::Date => String::from("DATE"),
            T::Time => String::from("TIME WITHOUT TIME ZONE"),
            T::Binary | T::TinyBinary | T::LongBinary => String::from("BYTEA"),
            T::Json => String::from("JSON"),
        }
    }

    fn parse_native_type(&self, native: &str) -> TypeInfo {
        use AbstractType as T;
        let (name, args) = split_native_type(native);
        let plain = TypeInfo::plain;
        match name.as_str() {
            "SERIAL" => plain(T::Primary),
            "BIGSERIAL" => plain(T::BigPrimary),
            "BOOLEAN" | "BOOL" => plain(T::Boolean),
            "INTEGER" | "INT" | "INT4" => plain(T::Integer),
            "SMALLINT" | "INT2" => plain(T::TinyInteger),
            "BIGINT" | "INT8" => plain(T::BigInteger),
            "CHARACTER VARYING" | "VARCHAR" | "CHARACTER" | "CHAR" => TypeInfo {
                size: Some(args.first().copied().unwrap_or(255)),
                ..plain(T::String)
            },
            "DOUBLE PRECISION" | "FLOAT8" => plain(T::Double),
            "REAL" | "FLOAT4" => plain(T::Float),
            "NUMERIC" | "DECIMAL" => TypeInfo {
                precision: args.first().and_then(|p| u8::try_from(*p).ok()),
                scale: args.get(1).and_then(|s| u8::try_from(*s).ok()),
                ..plain(T::Decimal)
            },
            "TIMESTAMP WITHOUT TIME ZONE" | "TIMESTAMP" => plain(T::Datetime),
            "DATE" => plain(T::Date),
            "TIME WITHOUT TIME ZONE" | "TIME" => plain(T::Time),
            "BYTEA" => plain(T::Binary),
            "JSON" | "JSONB" => plain(T::Json),
            _ => plain(T::Text),
        }
    }

    fn normalize_column(&self, column: &Column) -> Column {
        let mut column = column.clone();
        match column.abstract_type {
            AbstractType::TinyText | AbstractType::LongText => {
                column.abstract_type = AbstractType::Text;
            }
            AbstractType::TinyBinary | AbstractType::LongBinary => {
                column.abstract_type = AbstractType::Binary;
            }
            AbstractType::Timestamp => column.abstract_type = AbstractType::Datetime,
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
        if let Some(check) = self.enum_check(column) {
            sql.push(' ');
            sql.push_str(&check);
        }
        sql
    }

    fn alter_column(&self, table: &str, current: &Column, desired: &Column) -> Vec<String> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.identifier(table),
            self.identifier(&desired.name)
        );
        let mut statements = Vec::new();

        let type_changed = current.abstract_type != desired.abstract_type
            || current.size != desired.size
            || current.precision != desired.precision
            || current.scale != desired.scale;
        if type_changed {
            let native = self.native_type(desired);
            statements.push(format!(
                "{prefix} TYPE {native} USING {}::{native}",
                self.identifier(&desired.name)
            ));
        }
        if current.enum_values != desired.enum_values {
            // Column check constraints are named `{table}_{column}_check`.
            statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                self.identifier(table),
                self.identifier(&format!("{table}_{}_check", desired.name))
            ));
            if let Some(check) = self.enum_check(desired) {
                statements.push(format!(
                    "ALTER TABLE {} ADD {check}",
                    self.identifier(table)
                ));
            }
        }
        if current.nullable != desired.nullable {
            let action = if desired.nullable { "DROP" } else { "SET" };
            statements.push(format!("{prefix} {action} NOT NULL"));
        }
        if current.default != desired.default {
            match desired.default {
                Some(ref default) => statements.push(format!(
                    "{prefix} SET DEFAULT {}",
                    self.render_default(default)
                )),
                None => statements.push(format!("{prefix} DROP DEFAULT")),
            }
        }
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;

    #[test]
    fn numbered_placeholders() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.placeholder(1), "$1");
        assert_eq!(dialect.placeholder(12), "$12");
    }

    #[test]
    fn creates_table_with_table_level_primary_key() {
        let dialect = PostgresDialect::new();
        let mut table = TableSchema::new("users", "");
        table.primary("id");
        table.enum_values("role", &["admin", "guest"]);

        let statements = dialect.create_table(table.declared(), &[]);
        assert_eq!(
            statements[0],
            "CREATE TABLE \"users\" (\n    \"id\" SERIAL NOT NULL,\n    \"role\" CHARACTER VARYING(5) NOT NULL CHECK (\"role\" IN ('admin', 'guest')),\n    PRIMARY KEY (\"id\")\n)"
        );
    }

    #[test]
    fn alters_column_piecewise() {
        let dialect = PostgresDialect::new();
        let current = Column::new("age", AbstractType::Integer);
        let mut desired = Column::new("age", AbstractType::BigInteger);
        desired.nullable().default_value(crate::schema::DefaultValue::Integer(0));

        assert_eq!(
            dialect.alter_column("users", &current, &desired),
            vec![
                String::from(
                    "ALTER TABLE \"users\" ALTER COLUMN \"age\" TYPE BIGINT USING \"age\"::BIGINT"
                ),
                String::from("ALTER TABLE \"users\" ALTER COLUMN \"age\" DROP NOT NULL"),
                String::from("ALTER TABLE \"users\" ALTER COLUMN \"age\" SET DEFAULT 0"),
            ]
        );
    }
}
