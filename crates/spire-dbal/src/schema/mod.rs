//! Schema element model.
//!
//! A table is described twice: the *current* state introspected from the
//! live database and the *declared* state the application asks for. Both
//! are plain values; [`TableSchema::diff`] compares them without touching
//! either.

mod builder;
mod diff;

pub use builder::{SchemaBuilder, SyncPlan, SyncReport, TablePlan};
pub use diff::TableDiff;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Reference identifier length limit used by most DBMS.
pub const IDENTIFIER_LIMIT: usize = 64;

/// DBMS-independent column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstractType {
    /// Auto-incrementing integer primary key.
    Primary,
    /// Auto-incrementing 64-bit primary key.
    BigPrimary,
    /// Boolean flag.
    Boolean,
    /// 32-bit integer.
    Integer,
    /// 8-bit integer.
    TinyInteger,
    /// 64-bit integer.
    BigInteger,
    /// Variable-length string with a size.
    String,
    /// Text.
    Text,
    /// Short text.
    TinyText,
    /// Long text.
    LongText,
    /// Double precision float.
    Double,
    /// Single precision float.
    Float,
    /// Fixed point decimal.
    Decimal,
    /// Date and time.
    Datetime,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Timestamp.
    Timestamp,
    /// Binary data.
    Binary,
    /// Short binary data.
    TinyBinary,
    /// Long binary data.
    LongBinary,
    /// JSON document.
    Json,
    /// One value out of a fixed set.
    Enum,
}

impl AbstractType {
    /// Whether the type is an auto-incrementing primary key.
    #[must_use]
    pub const fn is_primary(self) -> bool {
        matches!(self, Self::Primary | Self::BigPrimary)
    }

    /// The integer type used by columns referencing a key of this type.
    #[must_use]
    pub const fn referencing_type(self) -> Self {
        match self {
            Self::Primary => Self::Integer,
            Self::BigPrimary => Self::BigInteger,
            other => other,
        }
    }

    /// The snake case name, as used in serialized schemas.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::BigPrimary => "big_primary",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::TinyInteger => "tiny_integer",
            Self::BigInteger => "big_integer",
            Self::String => "string",
            Self::Text => "text",
            Self::TinyText => "tiny_text",
            Self::LongText => "long_text",
            Self::Double => "double",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Datetime => "datetime",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Binary => "binary",
            Self::TinyBinary => "tiny_binary",
            Self::LongBinary => "long_binary",
            Self::Json => "json",
            Self::Enum => "enum",
        }
    }
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// NULL default.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// SQL expression (e.g., "CURRENT_TIMESTAMP").
    Expression(String),
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses the SQL representation reported by introspection.
    #[must_use]
    pub fn parse(sql: &str) -> Self {
        match sql.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" => Self::Restrict,
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

/// Shortens an identifier past the dialect limit by hashing it.
#[must_use]
pub fn limit_identifier(name: String, limit: usize) -> String {
    if name.len() <= limit {
        return name;
    }
    let hash = blake3::hash(name.as_bytes()).to_hex();
    format!("idx_{}", &hash.as_str()[..32])
}

/// A single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Abstract type.
    pub abstract_type: AbstractType,
    /// Native type reported by the database, when introspected.
    pub native_type: Option<String>,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default value.
    pub default: Option<DefaultValue>,
    /// Size for strings and binaries.
    pub size: Option<u32>,
    /// Decimal precision.
    pub precision: Option<u8>,
    /// Decimal scale.
    pub scale: Option<u8>,
    /// Allowed values of an enum column.
    pub enum_values: Vec<String>,
}

impl Column {
    /// Creates a NOT NULL column of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, abstract_type: AbstractType) -> Self {
        let mut column = Self {
            name: name.into(),
            abstract_type,
            native_type: None,
            nullable: false,
            default: None,
            size: None,
            precision: None,
            scale: None,
            enum_values: Vec::new(),
        };
        if abstract_type == AbstractType::String {
            column.size = Some(255);
        }
        column
    }

    /// Allows NULL values.
    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    /// Forbids NULL values.
    pub fn not_null(&mut self) -> &mut Self {
        self.nullable = false;
        self
    }

    /// Sets the default value.
    pub fn default_value(&mut self, value: DefaultValue) -> &mut Self {
        self.default = Some(value);
        self
    }

    /// Removes the default value.
    pub fn no_default(&mut self) -> &mut Self {
        self.default = None;
        self
    }

    /// Sets the size of string and binary columns.
    pub fn size(&mut self, size: u32) -> &mut Self {
        self.size = Some(size);
        self
    }

    /// Structural comparison. The native type is ignored because it is
    /// only known for introspected columns.
    #[must_use]
    pub fn compare(&self, other: &Self) -> bool {
        self.name == other.name
            && self.abstract_type == other.abstract_type
            && self.nullable == other.nullable
            && self.default == other.default
            && self.size == other.size
            && self.precision == other.precision
            && self.scale == other.scale
            && self.enum_values == other.enum_values
    }
}

/// A table index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Explicit (or introspected) name. Generated lazily when absent.
    pub name: Option<String>,
    /// Ordered index columns.
    pub columns: Vec<String>,
    /// UNIQUE index.
    pub unique: bool,
}

impl Index {
    /// Creates a non-unique index over the given columns.
    #[must_use]
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            unique: false,
        }
    }

    /// Changes uniqueness.
    pub fn unique(&mut self, unique: bool) -> &mut Self {
        self.unique = unique;
        self
    }

    /// Sets an explicit name.
    pub fn named(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the explicit name or a generated one,
    /// `{table}_index_{columns}_{index|unique}`, hashed past `limit`.
    #[must_use]
    pub fn name_for(&self, table: &str, limit: usize) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        let kind = if self.unique { "unique" } else { "index" };
        let name = format!("{table}_index_{}_{kind}", self.columns.join("_"));
        limit_identifier(name, limit)
    }

    /// Structural equality ignoring whether the name was declared or
    /// generated.
    #[must_use]
    pub fn compare(&self, other: &Self) -> bool {
        self.columns == other.columns && self.unique == other.unique
    }

    /// `[UNIQUE] INDEX <name> [ON <table>] (<columns>)`. The `ON` clause
    /// is left out for inline creation inside `CREATE TABLE`.
    #[must_use]
    pub fn sql_statement<D: crate::dialect::Dialect + ?Sized>(
        &self,
        dialect: &D,
        table: &str,
        include_table: bool,
    ) -> String {
        let mut statement = Vec::new();
        if self.unique {
            statement.push(String::from("UNIQUE"));
        }
        statement.push(String::from("INDEX"));
        statement.push(dialect.identifier(&self.name_for(table, dialect.identifier_limit())));
        if include_table {
            statement.push(format!("ON {}", dialect.identifier(table)));
        }
        let columns: Vec<String> = self.columns.iter().map(|c| dialect.identifier(c)).collect();
        statement.push(format!("({})", columns.join(", ")));
        statement.join(" ")
    }
}

/// A foreign key constraint over a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Explicit (or introspected) name. Generated lazily when absent.
    pub name: Option<String>,
    /// Local column.
    pub column: String,
    /// Referenced table (with prefix).
    pub foreign_table: String,
    /// Referenced column.
    pub foreign_key: String,
    /// ON DELETE action.
    pub on_delete: ForeignKeyAction,
    /// ON UPDATE action.
    pub on_update: ForeignKeyAction,
}

impl ForeignKey {
    /// Creates a reference from `column` to `foreign_table.foreign_key`.
    #[must_use]
    pub fn new(
        column: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            column: column.into(),
            foreign_table: foreign_table.into(),
            foreign_key: foreign_key.into(),
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }
    }

    /// Sets the ON DELETE action.
    pub fn on_delete(&mut self, action: ForeignKeyAction) -> &mut Self {
        self.on_delete = action;
        self
    }

    /// Sets the ON UPDATE action.
    pub fn on_update(&mut self, action: ForeignKeyAction) -> &mut Self {
        self.on_update = action;
        self
    }

    /// Returns the explicit name or `{table}_foreign_{column}`, hashed
    /// past `limit`.
    #[must_use]
    pub fn name_for(&self, table: &str, limit: usize) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        limit_identifier(format!("{table}_foreign_{}", self.column), limit)
    }

    /// Structural equality ignoring the name.
    #[must_use]
    pub fn compare(&self, other: &Self) -> bool {
        self.column == other.column
            && self.foreign_table == other.foreign_table
            && self.foreign_key == other.foreign_key
            && self.on_delete == other.on_delete
            && self.on_update == other.on_update
    }
}

/// Immutable snapshot of one table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableState {
    /// Table name including prefix.
    pub name: String,
    /// Columns in declaration order.
    pub columns: IndexMap<String, Column>,
    /// Indexes.
    pub indexes: Vec<Index>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
    /// Primary key columns.
    pub primary_keys: Vec<String>,
}

impl TableState {
    /// Creates an empty state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Finds an index by (resolved) name.
    #[must_use]
    pub fn index(&self, name: &str, limit: usize) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name_for(&self.name, limit) == name)
    }

    /// Finds a foreign key by (resolved) name.
    #[must_use]
    pub fn foreign_key(&self, name: &str, limit: usize) -> Option<&ForeignKey> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.name_for(&self.name, limit) == name)
    }

    /// Copy of the state where every index and foreign key carries its
    /// resolved name.
    #[must_use]
    pub fn resolved(&self, limit: usize) -> Self {
        let mut state = self.clone();
        for index in &mut state.indexes {
            index.name = Some(index.name_for(&self.name, limit));
        }
        for fk in &mut state.foreign_keys {
            fk.name = Some(fk.name_for(&self.name, limit));
        }
        state
    }

    /// Tables this one references through foreign keys.
    #[must_use]
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .foreign_keys
            .iter()
            .map(|fk| fk.foreign_table.as_str())
            .filter(|t| *t != self.name)
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }
}

/// Current and declared state of one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    prefix: String,
    current: Option<TableState>,
    declared: TableState,
    dropped_columns: Vec<String>,
    dropped_indexes: Vec<Vec<String>>,
    dropped_foreign_keys: Vec<String>,
    passive: bool,
}

impl TableSchema {
    /// Creates a schema for `name` inside a database with `prefix`.
    #[must_use]
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        let name = name.into();
        let prefix = prefix.into();
        let declared = TableState::new(format!("{prefix}{name}"));
        Self {
            name,
            prefix,
            current: None,
            declared,
            dropped_columns: Vec::new(),
            dropped_indexes: Vec::new(),
            dropped_foreign_keys: Vec::new(),
            passive: false,
        }
    }

    /// Table name without prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name with prefix.
    #[must_use]
    pub fn real_name(&self) -> &str {
        &self.declared.name
    }

    /// Database prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether the table exists in the database.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.current.is_some()
    }

    /// Introspected state, if the table exists.
    #[must_use]
    pub const fn current(&self) -> Option<&TableState> {
        self.current.as_ref()
    }

    /// Replaces the introspected state.
    pub fn set_current(&mut self, state: Option<TableState>) {
        self.current = state;
    }

    /// Explicit declarations only.
    #[must_use]
    pub const fn declared(&self) -> &TableState {
        &self.declared
    }

    /// Marks the table as passive: the synchronizer must never alter it.
    pub fn passive(&mut self, passive: bool) -> &mut Self {
        self.passive = passive;
        self
    }

    /// Whether the table is passive.
    #[must_use]
    pub const fn is_passive(&self) -> bool {
        self.passive
    }

    /// Declares (or redeclares) a column.
    pub fn column(&mut self, name: &str, abstract_type: AbstractType) -> &mut Column {
        self.dropped_columns.retain(|c| c != name);
        if abstract_type.is_primary() && !self.declared.primary_keys.iter().any(|p| p == name) {
            self.declared.primary_keys = vec![name.to_string()];
        }
        let column = self
            .declared
            .columns
            .entry(name.to_string())
            .or_insert_with(|| Column::new(name, abstract_type));
        if column.abstract_type != abstract_type {
            *column = Column::new(name, abstract_type);
        }
        column
    }

    /// Auto-incrementing primary key.
    pub fn primary(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Primary)
    }

    /// Auto-incrementing 64-bit primary key.
    pub fn big_primary(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::BigPrimary)
    }

    /// Boolean column.
    pub fn boolean(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Boolean)
    }

    /// Integer column.
    pub fn integer(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Integer)
    }

    /// Tiny integer column.
    pub fn tiny_integer(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::TinyInteger)
    }

    /// Big integer column.
    pub fn big_integer(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::BigInteger)
    }

    /// String column of the given size.
    pub fn string(&mut self, name: &str, size: u32) -> &mut Column {
        self.column(name, AbstractType::String).size(size)
    }

    /// Text column.
    pub fn text(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Text)
    }

    /// Float column.
    pub fn float(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Float)
    }

    /// Double column.
    pub fn double(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Double)
    }

    /// Decimal column.
    pub fn decimal(&mut self, name: &str, precision: u8, scale: u8) -> &mut Column {
        let column = self.column(name, AbstractType::Decimal);
        column.precision = Some(precision);
        column.scale = Some(scale);
        column
    }

    /// Datetime column.
    pub fn datetime(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Datetime)
    }

    /// Date column.
    pub fn date(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Date)
    }

    /// Time column.
    pub fn time(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Time)
    }

    /// Timestamp column.
    pub fn timestamp(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Timestamp)
    }

    /// Binary column.
    pub fn binary(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Binary)
    }

    /// JSON column.
    pub fn json(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Json)
    }

    /// Enum column restricted to `values`.
    pub fn enum_values<S: AsRef<str>>(&mut self, name: &str, values: &[S]) -> &mut Column {
        let column = self.column(name, AbstractType::Enum);
        column.enum_values = values.iter().map(|v| v.as_ref().to_string()).collect();
        column.size = values.iter().map(|v| v.as_ref().len()).max().and_then(|n| u32::try_from(n).ok());
        column
    }

    /// Declares an index over `columns`.
    pub fn index<S: AsRef<str>>(&mut self, columns: &[S]) -> &mut Index {
        let index = Index::new(columns);
        self.dropped_indexes.retain(|cols| *cols != index.columns);
        let position = match self
            .declared
            .indexes
            .iter()
            .position(|i| i.columns == index.columns)
        {
            Some(position) => position,
            None => {
                self.declared.indexes.push(index);
                self.declared.indexes.len() - 1
            }
        };
        &mut self.declared.indexes[position]
    }

    /// Declares a unique index over `columns`.
    pub fn unique<S: AsRef<str>>(&mut self, columns: &[S]) -> &mut Index {
        self.index(columns).unique(true)
    }

    /// Declares a foreign key from `column` to `table.key`. The referenced
    /// table name is given without prefix.
    pub fn foreign_key(&mut self, column: &str, table: &str, key: &str) -> &mut ForeignKey {
        self.dropped_foreign_keys.retain(|c| c != column);
        let foreign_table = format!("{}{table}", self.prefix);
        let position = match self
            .declared
            .foreign_keys
            .iter()
            .position(|fk| fk.column == column)
        {
            Some(position) => {
                let fk = &mut self.declared.foreign_keys[position];
                fk.foreign_table = foreign_table;
                fk.foreign_key = key.to_string();
                position
            }
            None => {
                self.declared
                    .foreign_keys
                    .push(ForeignKey::new(column, foreign_table, key));
                self.declared.foreign_keys.len() - 1
            }
        };
        &mut self.declared.foreign_keys[position]
    }

    /// Drops a column (and the indexes and keys relying on it).
    pub fn drop_column(&mut self, name: &str) {
        self.declared.columns.shift_remove(name);
        self.declared.indexes.retain(|i| !i.columns.iter().any(|c| c == name));
        self.declared.foreign_keys.retain(|fk| fk.column != name);
        if !self.dropped_columns.iter().any(|c| c == name) {
            self.dropped_columns.push(name.to_string());
        }
    }

    /// Drops the index over `columns`.
    pub fn drop_index<S: AsRef<str>>(&mut self, columns: &[S]) {
        let columns: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self.declared.indexes.retain(|i| i.columns != columns);
        self.dropped_indexes.push(columns);
    }

    /// Drops the foreign key on `column`.
    pub fn drop_foreign_key(&mut self, column: &str) {
        self.declared.foreign_keys.retain(|fk| fk.column != column);
        self.dropped_foreign_keys.push(column.to_string());
    }

    /// The state the table should have: the current state overlaid with
    /// declarations. Elements that exist but were never declared are kept
    /// unless dropped explicitly.
    #[must_use]
    pub fn desired(&self) -> TableState {
        let Some(ref current) = self.current else {
            return self.declared.clone();
        };

        let mut state = current.clone();
        state.name = self.declared.name.clone();

        for name in &self.dropped_columns {
            state.columns.shift_remove(name);
            state.indexes.retain(|i| !i.columns.iter().any(|c| c == name));
            state.foreign_keys.retain(|fk| fk.column != *name);
        }
        for columns in &self.dropped_indexes {
            state.indexes.retain(|i| i.columns != *columns);
        }
        for column in &self.dropped_foreign_keys {
            state.foreign_keys.retain(|fk| fk.column != *column);
        }

        for (name, column) in &self.declared.columns {
            state.columns.insert(name.clone(), column.clone());
        }
        for index in &self.declared.indexes {
            match state.indexes.iter_mut().find(|i| i.columns == index.columns) {
                Some(existing) => {
                    // Keep the live name so a declaration without a name
                    // does not force a rename.
                    let name = index.name.clone().or_else(|| existing.name.clone());
                    *existing = index.clone();
                    existing.name = name;
                }
                None => state.indexes.push(index.clone()),
            }
        }
        for fk in &self.declared.foreign_keys {
            match state.foreign_keys.iter_mut().find(|f| f.column == fk.column) {
                Some(existing) => {
                    let name = fk.name.clone().or_else(|| existing.name.clone());
                    *existing = fk.clone();
                    existing.name = name;
                }
                None => state.foreign_keys.push(fk.clone()),
            }
        }
        if !self.declared.primary_keys.is_empty() {
            state.primary_keys = self.declared.primary_keys.clone();
        }
        state
    }

    /// Diff between the current and the desired state.
    #[must_use]
    pub fn diff(&self, limit: usize) -> TableDiff {
        let empty = TableState::new(self.real_name());
        let current = self.current.as_ref().unwrap_or(&empty);
        TableDiff::compute(&self.name, current, &self.desired(), limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_differ_by_uniqueness() {
        let plain = Index::new(&["email"]);
        let mut unique = Index::new(&["email"]);
        unique.unique(true);

        let a = plain.name_for("users", IDENTIFIER_LIMIT);
        let b = unique.name_for("users", IDENTIFIER_LIMIT);
        assert_eq!(a, "users_index_email_index");
        assert_eq!(b, "users_index_email_unique");
        assert_ne!(a, b);
    }

    #[test]
    fn long_index_names_are_hashed_deterministically() {
        let index = Index::new(&[
            "first_very_long_column_name",
            "second_very_long_column_name",
            "third",
        ]);
        let name = index.name_for("prefix_some_table", IDENTIFIER_LIMIT);
        assert!(name.len() <= IDENTIFIER_LIMIT);
        assert!(name.starts_with("idx_"));
        assert_eq!(name, index.name_for("prefix_some_table", IDENTIFIER_LIMIT));
    }

    #[test]
    fn index_compare_ignores_name() {
        let mut a = Index::new(&["a", "b"]);
        a.named("custom");
        let b = Index::new(&["a", "b"]);
        assert!(a.compare(&b));
        let mut c = Index::new(&["a", "b"]);
        c.unique(true);
        assert!(!a.compare(&c));
    }

    #[test]
    fn index_sql_statement() {
        let dialect = crate::dialect::SqliteDialect::new();
        let mut index = Index::new(&["author_id", "title"]);
        index.unique(true);
        assert_eq!(
            index.sql_statement(&dialect, "posts", true),
            "UNIQUE INDEX \"posts_index_author_id_title_unique\" ON \"posts\" (\"author_id\", \"title\")"
        );
        assert_eq!(
            Index::new(&["title"]).sql_statement(&dialect, "posts", false),
            "INDEX \"posts_index_title_index\" (\"title\")"
        );
    }

    #[test]
    fn primary_declaration_sets_primary_keys() {
        let mut table = TableSchema::new("posts", "p_");
        table.primary("id");
        table.string("title", 64).nullable();
        assert_eq!(table.real_name(), "p_posts");
        assert_eq!(table.declared().primary_keys, vec!["id"]);
        let title = table.declared().column("title").unwrap();
        assert!(title.nullable);
        assert_eq!(title.size, Some(64));
    }

    #[test]
    fn desired_keeps_undeclared_current_columns() {
        let mut current = TableState::new("users");
        current.columns.insert(
            String::from("legacy"),
            Column::new("legacy", AbstractType::Text),
        );
        let mut table = TableSchema::new("users", "");
        table.set_current(Some(current));
        table.primary("id");

        let desired = table.desired();
        let names: Vec<&str> = desired.columns.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["legacy", "id"]);

        table.drop_column("legacy");
        assert!(table.desired().column("legacy").is_none());
    }

    #[test]
    fn foreign_key_gets_prefixed_table() {
        let mut table = TableSchema::new("posts", "p_");
        table
            .foreign_key("author_id", "users", "id")
            .on_delete(ForeignKeyAction::Cascade);
        let fk = &table.declared().foreign_keys[0];
        assert_eq!(fk.foreign_table, "p_users");
        assert_eq!(fk.name_for("p_posts", IDENTIFIER_LIMIT), "p_posts_foreign_author_id");
        assert_eq!(table.declared().dependencies(), vec!["p_users"]);
    }

    #[test]
    fn abstract_type_serializes_snake_case() {
        let json = serde_json::to_string(&AbstractType::BigPrimary).unwrap();
        assert_eq!(json, "\"big_primary\"");
        assert_eq!(AbstractType::TinyText.as_str(), "tiny_text");
    }
}
