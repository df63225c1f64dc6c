//! Runtime records: an ordered field map plus loaded relations.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use spire_dbal::{Row, SqlValue, ToSqlValue};

use crate::schema::{RecordSchema, PIVOT_DATA};

/// Records attached under a relation name.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// Has-one and belongs-to relations.
    One(Option<Box<Record>>),
    /// Has-many and many to many relations.
    Many(Vec<Record>),
}

impl Related {
    /// Attached records as a slice-like list.
    #[must_use]
    pub fn records(&self) -> Vec<&Record> {
        match self {
            Self::One(record) => record.iter().map(|r| &**r).collect(),
            Self::Many(records) => records.iter().collect(),
        }
    }

    /// The single record of a one relation.
    #[must_use]
    pub fn one(&self) -> Option<&Record> {
        match self {
            Self::One(record) => record.as_deref(),
            Self::Many(records) => records.first(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::One(record) => record
                .as_ref()
                .map_or(Value::Null, |r| Value::Object(r.public_fields())),
            Self::Many(records) => Value::Array(
                records
                    .iter()
                    .map(|r| Value::Object(r.public_fields()))
                    .collect(),
            ),
        }
    }
}

/// One row of a record class.
///
/// Fields are kept in column order. Fields written after the record was
/// created are tracked so saving only sends what changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    class: String,
    schema: Arc<RecordSchema>,
    fields: IndexMap<String, SqlValue>,
    updates: IndexSet<String>,
    loaded: bool,
    relations: IndexMap<String, Related>,
    pivot: Row,
}

impl Record {
    /// Creates a record of `class` from `data`. Columns missing from
    /// `data` start as NULL. `loaded` tells whether the row came from the
    /// database.
    #[must_use]
    pub fn new(class: impl Into<String>, schema: Arc<RecordSchema>, data: Row, loaded: bool) -> Self {
        let mut fields: IndexMap<String, SqlValue> = schema
            .columns
            .keys()
            .map(|name| (name.clone(), SqlValue::Null))
            .collect();
        let mut pivot = Row::new();
        for (name, value) in data {
            match name.strip_prefix(PIVOT_DATA).and_then(|rest| rest.strip_prefix('.')) {
                Some(column) => {
                    pivot.insert(column.to_string(), value);
                }
                None => {
                    fields.insert(name, value);
                }
            }
        }
        Self {
            class: class.into(),
            schema,
            fields,
            updates: IndexSet::new(),
            loaded,
            relations: IndexMap::new(),
            pivot,
        }
    }

    /// Record class.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Role name of the class.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.schema.role
    }

    /// Normalized schema of the class.
    #[must_use]
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Whether the row exists in the database.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn mark_loaded(&mut self) {
        self.loaded = true;
        self.updates.clear();
    }

    /// Value of `name` after its getter mutator, NULL when unknown.
    #[must_use]
    pub fn field(&self, name: &str) -> SqlValue {
        let value = self.fields.get(name).cloned().unwrap_or(SqlValue::Null);
        match self.schema.mutators.getters.get(name) {
            Some(getter) => getter.apply(value),
            None => value,
        }
    }

    /// Stored value of `name`, without mutators.
    #[must_use]
    pub fn raw_field(&self, name: &str) -> Option<&SqlValue> {
        self.fields.get(name)
    }

    /// Whether the record has a field `name`.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// All stored fields.
    #[must_use]
    pub const fn fields(&self) -> &IndexMap<String, SqlValue> {
        &self.fields
    }

    /// Writes `name`. With `filter` the setter mutator runs first. Writing
    /// the value already stored changes nothing.
    pub fn set_field(&mut self, name: &str, value: impl ToSqlValue, filter: bool) -> &mut Self {
        let mut value = value.to_sql_value();
        if filter {
            if let Some(setter) = self.schema.mutators.setters.get(name) {
                value = setter.apply(value);
            }
        }
        if self.fields.get(name) != Some(&value) {
            self.fields.insert(name.to_string(), value);
            self.updates.insert(name.to_string());
        }
        self
    }

    /// Mass assignment: writes the fillable entries of `data` through
    /// their setters and skips the rest.
    pub fn set_fields<K, V>(&mut self, data: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: AsRef<str>,
        V: ToSqlValue,
    {
        for (name, value) in data {
            let name = name.as_ref();
            if self.schema.is_fillable(name) {
                self.set_field(name, value, true);
            }
        }
        self
    }

    /// Fields written since the record was created or saved.
    #[must_use]
    pub const fn updates(&self) -> &IndexSet<String> {
        &self.updates
    }

    /// Whether any field was written.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.updates.is_empty()
    }

    /// Primary key value, `None` when unset.
    #[must_use]
    pub fn primary_key(&self) -> Option<&SqlValue> {
        let key = self.schema.primary_key.as_ref()?;
        self.fields.get(key).filter(|value| !value.is_null())
    }

    /// Non-hidden fields after getters, with loaded relations nested.
    #[must_use]
    pub fn public_fields(&self) -> Map<String, Value> {
        let mut public = Map::new();
        for name in self.fields.keys() {
            if !self.schema.is_hidden(name) {
                public.insert(name.clone(), self.field(name).to_json());
            }
        }
        for (name, related) in &self.relations {
            if !self.schema.is_hidden(name) {
                public.insert(name.clone(), related.to_json());
            }
        }
        if !self.pivot.is_empty() {
            let pivot = self
                .pivot
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect();
            public.insert(PIVOT_DATA.to_string(), Value::Object(pivot));
        }
        public
    }

    /// Records loaded under relation `name`.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    /// Loaded relations.
    #[must_use]
    pub const fn relations(&self) -> &IndexMap<String, Related> {
        &self.relations
    }

    /// Attaches records under relation `name`.
    pub fn set_relation(&mut self, name: &str, related: Related) -> &mut Self {
        self.relations.insert(name.to_string(), related);
        self
    }

    /// Pivot columns, present on records loaded through a many to many
    /// relation.
    #[must_use]
    pub const fn pivot(&self) -> &Row {
        &self.pivot
    }
}
