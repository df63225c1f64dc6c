//! Record declarations and the normalized schema derived from them.
//!
//! The normalized schema is what runtime code reads: one [`RecordSchema`]
//! per record class and one [`NormalizedRelation`] per declared relation.
//! Both serialize as fixed-position JSON arrays so the cached form stays
//! compact and independent of field names. The `M_*` and `R_*` constants
//! give the positions.

mod builder;
mod declaration;

pub use builder::{fingerprint, RelationContext, SchemaBuilder};
pub use declaration::{RecordDeclaration, RelationDeclaration};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use spire_dbal::{AbstractType, SqlValue};

/// Position of the role name in a serialized record schema.
pub const M_ROLE_NAME: usize = 0;
/// Position of the source type.
pub const M_SOURCE: usize = 1;
/// Position of the table name.
pub const M_TABLE: usize = 2;
/// Position of the database name.
pub const M_DB: usize = 3;
/// Position of the hidden fields.
pub const M_HIDDEN: usize = 4;
/// Position of the secured fields.
pub const M_SECURED: usize = 5;
/// Position of the fillable fields.
pub const M_FILLABLE: usize = 6;
/// Position of the getter and setter mutators.
pub const M_MUTATORS: usize = 7;
/// Position of the validation rules.
pub const M_VALIDATES: usize = 8;
/// Position of the column to abstract type map.
pub const M_COLUMNS: usize = 9;
/// Position of the nullable columns.
pub const M_NULLABLE: usize = 10;
/// Position of the relations.
pub const M_RELATIONS: usize = 11;
/// Position of the primary key name.
pub const M_PRIMARY_KEY: usize = 12;

/// Position of the relation type in a serialized relation.
pub const R_TYPE: usize = 0;
/// Position of the related table.
pub const R_TABLE: usize = 1;
/// Position of the resolved definition.
pub const R_DEFINITION: usize = 2;
/// Position of the related database.
pub const R_DATABASE: usize = 3;

/// Field holding pivot columns of records loaded through a many to many
/// relation.
pub const PIVOT_DATA: &str = "@pivot";

/// Named value conversion applied when a field is read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutator {
    /// Integer, NULL when not numeric.
    Integer,
    /// Float, NULL when not numeric.
    Float,
    /// Boolean; `"1"`, `"true"`, `"on"` and `"yes"` are true.
    Boolean,
    /// Text form of scalars.
    String,
    /// Strips surrounding whitespace.
    Trim,
    /// Lower case text.
    Lowercase,
    /// Upper case text.
    Uppercase,
}

impl Mutator {
    /// Converts `value`. NULL stays NULL.
    #[must_use]
    pub fn apply(self, value: SqlValue) -> SqlValue {
        if value.is_null() {
            return value;
        }
        match self {
            Self::Integer => value.as_i64().map_or(SqlValue::Null, SqlValue::Int),
            Self::Float => value.as_f64().map_or(SqlValue::Null, SqlValue::Float),
            Self::Boolean => SqlValue::Bool(match value {
                SqlValue::Bool(b) => b,
                SqlValue::Text(ref s) => {
                    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes")
                }
                ref other => other.as_i64().is_some_and(|n| n != 0),
            }),
            Self::String => match value {
                SqlValue::Text(_) => value,
                SqlValue::Int(n) => SqlValue::Text(n.to_string()),
                SqlValue::Float(f) => SqlValue::Text(f.to_string()),
                SqlValue::Bool(b) => SqlValue::Text(String::from(if b { "1" } else { "0" })),
                SqlValue::DateTime(dt) => {
                    SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string())
                }
                other => other,
            },
            Self::Trim => map_text(value, |s| s.trim().to_string()),
            Self::Lowercase => map_text(value, str::to_lowercase),
            Self::Uppercase => map_text(value, str::to_uppercase),
        }
    }
}

fn map_text(value: SqlValue, f: impl FnOnce(&str) -> String) -> SqlValue {
    match value {
        SqlValue::Text(s) => SqlValue::Text(f(&s)),
        other => other,
    }
}

/// Getter and setter mutators by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutators {
    /// Applied when a field is read.
    #[serde(default)]
    pub getters: IndexMap<String, Mutator>,
    /// Applied when a field is written with filtering.
    #[serde(default)]
    pub setters: IndexMap<String, Mutator>,
}

/// Pivot table of a many to many relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotDefinition {
    /// Table name without prefix.
    pub table: String,
    /// Pivot column referencing the parent.
    pub inner_key: String,
    /// Pivot column referencing the related record.
    pub outer_key: String,
    /// Extra pivot columns exposed under [`PIVOT_DATA`].
    #[serde(default)]
    pub columns: Vec<String>,
}

/// One possible target of a morphed belongs-to relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MorphTarget {
    /// Record class.
    pub class: String,
    /// Table without prefix.
    pub table: String,
    /// Primary key of the target.
    pub key: String,
}

/// Relation definition with every key resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// Related record class. Empty for morphed belongs-to.
    pub target: String,
    /// Key on the record declaring the relation.
    pub inner_key: String,
    /// Key on the related table.
    pub outer_key: String,
    /// Column holding the role of the owning record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morph_key: Option<String>,
    /// Pivot of many to many relations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot: Option<PivotDefinition>,
    /// Targets of morphed belongs-to by role.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub morph_targets: IndexMap<String, MorphTarget>,
    /// Whether the relation may be empty.
    #[serde(default)]
    pub nullable: bool,
}

type RelationTuple = (String, String, RelationDefinition, Option<String>);

/// A relation as stored in the normalized schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RelationTuple", into = "RelationTuple")]
pub struct NormalizedRelation {
    /// Registered relation type.
    pub kind: String,
    /// Related table without prefix.
    pub table: String,
    /// Resolved keys.
    pub definition: RelationDefinition,
    /// Database of the related table, `None` for the default one.
    pub database: Option<String>,
}

impl From<RelationTuple> for NormalizedRelation {
    fn from((kind, table, definition, database): RelationTuple) -> Self {
        Self {
            kind,
            table,
            definition,
            database,
        }
    }
}

impl From<NormalizedRelation> for RelationTuple {
    fn from(relation: NormalizedRelation) -> Self {
        (
            relation.kind,
            relation.table,
            relation.definition,
            relation.database,
        )
    }
}

type RecordTuple = (
    String,
    Option<String>,
    String,
    Option<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Mutators,
    IndexMap<String, serde_json::Value>,
    IndexMap<String, AbstractType>,
    Vec<String>,
    IndexMap<String, NormalizedRelation>,
    Option<String>,
);

/// Everything runtime code needs to know about a record class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecordTuple", into = "RecordTuple")]
pub struct RecordSchema {
    /// Role name used by morphed relations and as the selector alias.
    pub role: String,
    /// Custom source type, if any.
    pub source: Option<String>,
    /// Table without prefix.
    pub table: String,
    /// Declared database, `None` for the default one.
    pub database: Option<String>,
    /// Fields left out of public output.
    pub hidden: Vec<String>,
    /// Fields mass assignment never writes; `*` secures everything.
    pub secured: Vec<String>,
    /// Fields mass assignment may write. When set, only these are written.
    pub fillable: Vec<String>,
    /// Getter and setter mutators.
    pub mutators: Mutators,
    /// Validation rules, carried as opaque data.
    pub validates: IndexMap<String, serde_json::Value>,
    /// Column name to abstract type.
    pub columns: IndexMap<String, AbstractType>,
    /// Columns allowing NULL.
    pub nullable: Vec<String>,
    /// Relations by name.
    pub relations: IndexMap<String, NormalizedRelation>,
    /// Primary key column.
    pub primary_key: Option<String>,
}

impl From<RecordTuple> for RecordSchema {
    fn from(tuple: RecordTuple) -> Self {
        let (
            role,
            source,
            table,
            database,
            hidden,
            secured,
            fillable,
            mutators,
            validates,
            columns,
            nullable,
            relations,
            primary_key,
        ) = tuple;
        Self {
            role,
            source,
            table,
            database,
            hidden,
            secured,
            fillable,
            mutators,
            validates,
            columns,
            nullable,
            relations,
            primary_key,
        }
    }
}

impl From<RecordSchema> for RecordTuple {
    fn from(schema: RecordSchema) -> Self {
        (
            schema.role,
            schema.source,
            schema.table,
            schema.database,
            schema.hidden,
            schema.secured,
            schema.fillable,
            schema.mutators,
            schema.validates,
            schema.columns,
            schema.nullable,
            schema.relations,
            schema.primary_key,
        )
    }
}

impl RecordSchema {
    /// Relation `name`.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&NormalizedRelation> {
        self.relations.get(name)
    }

    /// Whether mass assignment may write `field`.
    #[must_use]
    pub fn is_fillable(&self, field: &str) -> bool {
        if !self.fillable.is_empty() {
            return self.fillable.iter().any(|f| f == field);
        }
        if self.secured.iter().any(|f| f == "*") {
            return false;
        }
        !self.secured.iter().any(|f| f == field)
    }

    /// Whether `field` is left out of public output.
    #[must_use]
    pub fn is_hidden(&self, field: &str) -> bool {
        self.hidden.iter().any(|f| f == field)
    }
}

/// Normalized schema of every record, keyed by class.
pub type NormalizedSchema = IndexMap<String, RecordSchema>;
