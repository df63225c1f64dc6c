use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use spire_dbal::{AbstractType, Column, ForeignKeyAction, Index};

use super::{Mutator, Mutators};
use crate::relations::{BELONGS_TO, BELONGS_TO_MORPHED, HAS_MANY, HAS_ONE, MANY_TO_MANY};

/// A record class as the application declares it.
///
/// ```ignore
/// let mut post = RecordDeclaration::new("Post");
/// post.primary("id");
/// post.string("title", 255);
/// post.belongs_to("author", "User");
/// post.has_many("comments", "Comment");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDeclaration {
    /// Record class, the key of the normalized schema.
    pub class: String,
    /// Role name. Defaults to the snake case class name.
    pub role: String,
    /// Table without prefix. Defaults to the plural role.
    pub table: String,
    /// Database or alias, `None` for the default database.
    pub database: Option<String>,
    /// Custom source type carried into the schema.
    pub source: Option<String>,
    /// The table must never be altered by synchronization.
    pub passive: bool,
    columns: IndexMap<String, Column>,
    indexes: Vec<Index>,
    relations: IndexMap<String, RelationDeclaration>,
    hidden: Vec<String>,
    secured: Vec<String>,
    fillable: Vec<String>,
    mutators: Mutators,
    validates: IndexMap<String, serde_json::Value>,
}

impl RecordDeclaration {
    /// Declares `class` with derived role and table names.
    pub fn new(class: impl Into<String>) -> Self {
        let class = class.into();
        let role = role_name(&class);
        let table = plural(&role);
        Self {
            class,
            role,
            table,
            database: None,
            source: None,
            passive: false,
            columns: IndexMap::new(),
            indexes: Vec::new(),
            relations: IndexMap::new(),
            hidden: Vec::new(),
            secured: Vec::new(),
            fillable: Vec::new(),
            mutators: Mutators::default(),
            validates: IndexMap::new(),
        }
    }

    /// Overrides the role name.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Overrides the table name.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Stores the record in `database` (a name or alias).
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the source type.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Marks the table passive.
    #[must_use]
    pub const fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Declares a column.
    pub fn column(&mut self, name: &str, abstract_type: AbstractType) -> &mut Column {
        let column = self
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

    /// 64-bit auto-incrementing primary key.
    pub fn big_primary(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::BigPrimary)
    }

    /// Integer column.
    pub fn integer(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Integer)
    }

    /// 64-bit integer column.
    pub fn big_integer(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::BigInteger)
    }

    /// String column of `size` characters.
    pub fn string(&mut self, name: &str, size: u32) -> &mut Column {
        self.column(name, AbstractType::String).size(size)
    }

    /// Text column.
    pub fn text(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Text)
    }

    /// Boolean column.
    pub fn boolean(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Boolean)
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

    /// Date and time column.
    pub fn datetime(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Datetime)
    }

    /// JSON column.
    pub fn json(&mut self, name: &str) -> &mut Column {
        self.column(name, AbstractType::Json)
    }

    /// Index over `columns`.
    pub fn index<S: AsRef<str>>(&mut self, columns: &[S]) -> &mut Index {
        let index = Index::new(columns);
        let position = match self.indexes.iter().position(|i| i.columns == index.columns) {
            Some(position) => position,
            None => {
                self.indexes.push(index);
                self.indexes.len() - 1
            }
        };
        &mut self.indexes[position]
    }

    /// Unique index over `columns`.
    pub fn unique<S: AsRef<str>>(&mut self, columns: &[S]) -> &mut Index {
        self.index(columns).unique(true)
    }

    /// Relation of any registered `kind`.
    pub fn relation(&mut self, name: &str, kind: &str, target: &str) -> &mut RelationDeclaration {
        let (index, _) = self
            .relations
            .insert_full(name.to_string(), RelationDeclaration::new(kind, target));
        &mut self.relations[index]
    }

    /// One related record holding a key to this one.
    pub fn has_one(&mut self, name: &str, target: &str) -> &mut RelationDeclaration {
        self.relation(name, HAS_ONE, target)
    }

    /// Many related records holding a key to this one.
    pub fn has_many(&mut self, name: &str, target: &str) -> &mut RelationDeclaration {
        self.relation(name, HAS_MANY, target)
    }

    /// The record this one holds a key to.
    pub fn belongs_to(&mut self, name: &str, target: &str) -> &mut RelationDeclaration {
        self.relation(name, BELONGS_TO, target)
    }

    /// A record of one of `targets`, told apart by a morph key.
    pub fn belongs_to_morphed<S: AsRef<str>>(
        &mut self,
        name: &str,
        targets: &[S],
    ) -> &mut RelationDeclaration {
        let relation = self.relation(name, BELONGS_TO_MORPHED, "");
        relation.targets = targets.iter().map(|t| t.as_ref().to_string()).collect();
        relation
    }

    /// Records linked through a pivot table.
    pub fn many_to_many(&mut self, name: &str, target: &str) -> &mut RelationDeclaration {
        self.relation(name, MANY_TO_MANY, target)
    }

    /// Fields left out of public output.
    pub fn hidden<S: AsRef<str>>(&mut self, fields: &[S]) -> &mut Self {
        self.hidden = to_strings(fields);
        self
    }

    /// Fields mass assignment never writes.
    pub fn secured<S: AsRef<str>>(&mut self, fields: &[S]) -> &mut Self {
        self.secured = to_strings(fields);
        self
    }

    /// The only fields mass assignment writes.
    pub fn fillable<S: AsRef<str>>(&mut self, fields: &[S]) -> &mut Self {
        self.fillable = to_strings(fields);
        self
    }

    /// Mutator applied when `field` is read.
    pub fn getter(&mut self, field: &str, mutator: Mutator) -> &mut Self {
        self.mutators.getters.insert(field.to_string(), mutator);
        self
    }

    /// Mutator applied when `field` is written with filtering.
    pub fn setter(&mut self, field: &str, mutator: Mutator) -> &mut Self {
        self.mutators.setters.insert(field.to_string(), mutator);
        self
    }

    /// Validation rules of `field`.
    pub fn validate(&mut self, field: &str, rules: serde_json::Value) -> &mut Self {
        self.validates.insert(field.to_string(), rules);
        self
    }

    /// Declared columns.
    #[must_use]
    pub const fn columns(&self) -> &IndexMap<String, Column> {
        &self.columns
    }

    /// Declared indexes.
    #[must_use]
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Declared relations.
    #[must_use]
    pub const fn relations(&self) -> &IndexMap<String, RelationDeclaration> {
        &self.relations
    }

    /// Hidden fields.
    #[must_use]
    pub fn hidden_fields(&self) -> &[String] {
        &self.hidden
    }

    /// Secured fields.
    #[must_use]
    pub fn secured_fields(&self) -> &[String] {
        &self.secured
    }

    /// Fillable fields.
    #[must_use]
    pub fn fillable_fields(&self) -> &[String] {
        &self.fillable
    }

    /// Mutators.
    #[must_use]
    pub const fn mutators(&self) -> &Mutators {
        &self.mutators
    }

    /// Validation rules.
    #[must_use]
    pub const fn validates(&self) -> &IndexMap<String, serde_json::Value> {
        &self.validates
    }

    /// The first auto-incrementing column.
    #[must_use]
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.values().find(|c| c.abstract_type.is_primary())
    }
}

/// A declared relation. Unset keys are derived when the schema is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDeclaration {
    /// Registered relation type.
    pub kind: String,
    /// Related record class.
    pub target: String,
    /// Candidate classes of a morphed belongs-to.
    pub targets: Vec<String>,
    /// Key on the declaring record.
    pub inner_key: Option<String>,
    /// Key on the related table.
    pub outer_key: Option<String>,
    /// Column holding the role of the owning record.
    pub morph_key: Option<String>,
    /// Pivot table of many to many relations.
    pub pivot_table: Option<String>,
    /// Pivot column referencing the declaring record.
    pub thought_inner_key: Option<String>,
    /// Pivot column referencing the related record.
    pub thought_outer_key: Option<String>,
    /// Extra pivot columns.
    pub pivot_columns: IndexMap<String, AbstractType>,
    /// Whether the key column allows NULL.
    pub nullable: Option<bool>,
    /// Whether a foreign key constraint is declared.
    pub constraint: bool,
    /// ON DELETE action of the constraint.
    pub on_delete: ForeignKeyAction,
    /// Whether key columns get an index.
    pub create_indexes: bool,
}

impl RelationDeclaration {
    /// Relation of `kind` to `target` with default options.
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            targets: Vec::new(),
            inner_key: None,
            outer_key: None,
            morph_key: None,
            pivot_table: None,
            thought_inner_key: None,
            thought_outer_key: None,
            pivot_columns: IndexMap::new(),
            nullable: None,
            constraint: true,
            on_delete: ForeignKeyAction::Cascade,
            create_indexes: true,
        }
    }

    /// Key on the declaring record.
    pub fn inner_key(&mut self, key: &str) -> &mut Self {
        self.inner_key = Some(key.to_string());
        self
    }

    /// Key on the related table.
    pub fn outer_key(&mut self, key: &str) -> &mut Self {
        self.outer_key = Some(key.to_string());
        self
    }

    /// Stores the owner role in `key`, making the relation polymorphic.
    pub fn morph_key(&mut self, key: &str) -> &mut Self {
        self.morph_key = Some(key.to_string());
        self
    }

    /// Pivot table name.
    pub fn pivot_table(&mut self, table: &str) -> &mut Self {
        self.pivot_table = Some(table.to_string());
        self
    }

    /// Pivot column referencing the declaring record.
    pub fn thought_inner_key(&mut self, key: &str) -> &mut Self {
        self.thought_inner_key = Some(key.to_string());
        self
    }

    /// Pivot column referencing the related record.
    pub fn thought_outer_key(&mut self, key: &str) -> &mut Self {
        self.thought_outer_key = Some(key.to_string());
        self
    }

    /// Extra pivot column.
    pub fn pivot_column(&mut self, name: &str, abstract_type: AbstractType) -> &mut Self {
        self.pivot_columns.insert(name.to_string(), abstract_type);
        self
    }

    /// Whether the key column allows NULL.
    pub fn nullable(&mut self, nullable: bool) -> &mut Self {
        self.nullable = Some(nullable);
        self
    }

    /// Whether a foreign key constraint is declared.
    pub fn constraint(&mut self, constraint: bool) -> &mut Self {
        self.constraint = constraint;
        self
    }

    /// ON DELETE action of the constraint.
    pub fn on_delete(&mut self, action: ForeignKeyAction) -> &mut Self {
        self.on_delete = action;
        self
    }

    /// Whether key columns get an index.
    pub fn create_indexes(&mut self, create: bool) -> &mut Self {
        self.create_indexes = create;
        self
    }
}

fn to_strings<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    items.iter().map(|s| s.as_ref().to_string()).collect()
}

/// `app::BlogPost` becomes `blog_post`.
fn role_name(class: &str) -> String {
    let short = class.rsplit("::").next().unwrap_or(class);
    let mut role = String::with_capacity(short.len() + 4);
    for (i, ch) in short.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                role.push('_');
            }
            role.extend(ch.to_lowercase());
        } else {
            role.push(ch);
        }
    }
    role
}

fn plural(word: &str) -> String {
    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{word}es");
    }
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    format!("{word}s")
}
