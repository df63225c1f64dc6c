//! Relation types, their runtime objects and their loaders.
//!
//! Every relation type is registered under a string tag with three
//! factories: a schema function resolving the declaration while the schema
//! is built, a runtime [`Relation`] and a [`Loader`]. Built-in types come
//! from [`RelationRegistry::with_defaults`]; other types are added with
//! [`RelationRegistry::register`] without touching the dispatcher.

mod belongs_to;
mod has;
mod many_to_many;

use std::collections::BTreeMap;
use std::fmt;

pub use belongs_to::{BelongsTo, BelongsToLoader, BelongsToMorphed};
pub use has::{Has, HasLoader};
pub use many_to_many::{ManyToMany, ManyToManyLoader};

use spire_dbal::{
    AbstractType, Filter, ForeignKeyAction, InsertQuery, SelectQuery, SqlValue, TableSchema,
    WhereTree,
};

use crate::error::{OrmError, Result};
use crate::record::Record;
use crate::schema::{NormalizedRelation, RecordSchema, RelationContext};

/// One related record holding a key to the parent.
pub const HAS_ONE: &str = "has_one";
/// Many related records holding a key to the parent.
pub const HAS_MANY: &str = "has_many";
/// The parent holds a key to the related record.
pub const BELONGS_TO: &str = "belongs_to";
/// Belongs-to whose target class is named by a morph key.
pub const BELONGS_TO_MORPHED: &str = "belongs_to_morphed";
/// Records linked through a pivot table.
pub const MANY_TO_MANY: &str = "many_to_many";

/// A relation bound to its resolved definition.
pub trait Relation: fmt::Debug + Send + Sync {
    /// Normalized relation.
    fn schema(&self) -> &NormalizedRelation;

    /// Whether the relation holds a list of records.
    fn is_many(&self) -> bool;

    /// Class of the records related to `parent`.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] when a morphed relation names an unknown
    /// role.
    fn target(&self, parent: &Record) -> Result<String>;

    /// Query selecting the records related to `parent`, `None` when the
    /// parent lacks the key to look them up.
    ///
    /// # Errors
    ///
    /// See [`target`](Self::target).
    fn selector(&self, parent: &Record) -> Result<Option<SelectQuery>>;

    /// Copies relation keys between `parent` and `related` so they point
    /// at each other. Keys that already match are left alone; returns
    /// whether anything was written.
    fn mount(&self, parent: &mut Record, related: &mut Record) -> bool;

    /// Row linking `parent` and `related`, for relations stored in a pivot
    /// table.
    fn link(&self, _parent: &Record, _related: &Record, _pivot: &[(String, SqlValue)]) -> Option<InsertQuery> {
        None
    }
}

/// Eager loading for one relation type.
pub trait Loader: fmt::Debug + Send + Sync {
    /// Normalized relation.
    fn schema(&self) -> &NormalizedRelation;

    /// Whether each parent gets a list of records.
    fn is_many(&self) -> bool;

    /// Parent field whose values are collected for [`post_load`](Self::post_load).
    fn parent_key(&self) -> &str;

    /// Column of post-loaded rows matched against [`parent_key`](Self::parent_key).
    fn reference(&self) -> String;

    /// Joins the related table onto `query` as `alias`. `parent_alias`
    /// names the table the relation starts from.
    fn join(&self, query: SelectQuery, parent_alias: &str, alias: &str) -> SelectQuery;

    /// One query loading the related rows of every parent key.
    fn post_load(&self, parent_keys: &[SqlValue]) -> SelectQuery;
}

/// Resolves a declared relation while the schema is built.
pub type SchemaFn = fn(&mut RelationContext<'_>) -> Result<NormalizedRelation>;
/// Builds the runtime relation.
pub type RelationFn = fn(&NormalizedRelation) -> Box<dyn Relation>;
/// Builds the loader. Receives the schema of the record the relation
/// starts from.
pub type LoaderFn = fn(&RecordSchema, &NormalizedRelation) -> Result<Box<dyn Loader>>;

/// Factories of one relation type.
#[derive(Debug, Clone, Copy)]
pub struct RelationFactory {
    /// Schema resolution.
    pub schema: SchemaFn,
    /// Runtime relation.
    pub relation: RelationFn,
    /// Loader.
    pub loader: LoaderFn,
}

/// Relation type tag to factories.
#[derive(Debug, Clone, Default)]
pub struct RelationRegistry {
    factories: BTreeMap<String, RelationFactory>,
}

impl RelationRegistry {
    /// Registry without any type.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in types.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(HAS_ONE, has::HAS_ONE_FACTORY)
            .register(HAS_MANY, has::HAS_MANY_FACTORY)
            .register(BELONGS_TO, belongs_to::BELONGS_TO_FACTORY)
            .register(BELONGS_TO_MORPHED, belongs_to::BELONGS_TO_MORPHED_FACTORY)
            .register(MANY_TO_MANY, many_to_many::MANY_TO_MANY_FACTORY);
        registry
    }

    /// Registers (or replaces) the factories of `kind`.
    pub fn register(&mut self, kind: &str, factory: RelationFactory) -> &mut Self {
        self.factories.insert(kind.to_string(), factory);
        self
    }

    /// Whether `kind` is registered.
    #[must_use]
    pub fn has(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered tags.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Factories of `kind`.
    ///
    /// # Errors
    ///
    /// [`OrmError::RelationResolution`] when `kind` is not registered.
    pub fn factory(&self, kind: &str) -> Result<&RelationFactory> {
        self.factories
            .get(kind)
            .ok_or_else(|| {
                OrmError::RelationResolution(format!("no relation type \"{kind}\" is registered"))
            })
    }

    /// Runtime relation for `relation`.
    ///
    /// # Errors
    ///
    /// [`OrmError::RelationResolution`] when its type is not registered.
    pub fn relation(&self, relation: &NormalizedRelation) -> Result<Box<dyn Relation>> {
        Ok((self.factory(&relation.kind)?.relation)(relation))
    }

    /// Loader for `relation` starting at `owner`.
    ///
    /// # Errors
    ///
    /// [`OrmError::RelationResolution`] when its type is not registered or
    /// cannot be eager loaded.
    pub fn loader(&self, owner: &RecordSchema, relation: &NormalizedRelation) -> Result<Box<dyn Loader>> {
        (self.factory(&relation.kind)?.loader)(owner, relation)
    }
}

/// Declares `column` unless the table already declares it.
pub(crate) fn ensure_column(table: &mut TableSchema, column: &str, abstract_type: AbstractType, nullable: bool) {
    if table.declared().column(column).is_none() {
        let declared = table.column(column, abstract_type);
        if nullable {
            declared.nullable();
        }
    }
}

/// Declares a foreign key with the relation's action.
pub(crate) fn ensure_foreign_key(
    table: &mut TableSchema,
    column: &str,
    foreign_table: &str,
    foreign_key: &str,
    on_delete: ForeignKeyAction,
) {
    table
        .foreign_key(column, foreign_table, foreign_key)
        .on_delete(on_delete);
}

/// `{role}_{key}`, the default name of a column referencing `key`.
pub(crate) fn key_name(role: &str, key: &str) -> String {
    format!("{role}_{key}")
}

/// `WHERE column = value` plus the optional morph predicate.
pub(crate) fn keyed(
    query: SelectQuery,
    column: &str,
    value: SqlValue,
    morph: Option<(&str, &str)>,
) -> SelectQuery {
    let query = query.where_eq(column, value);
    match morph {
        Some((morph_column, role)) => query.where_eq(morph_column, role),
        None => query,
    }
}

/// ON tree `alias.column = parent_alias.key` plus the optional morph
/// predicate.
pub(crate) fn join_on(on: WhereTree, left: &str, right: &str, morph: Option<(String, String)>) -> WhereTree {
    let on = on.on(left, "=", right);
    match morph {
        Some((column, role)) => on.and(&column, "=", role),
        None => on,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_builtin_types() {
        let registry = RelationRegistry::with_defaults();
        let kinds: Vec<&str> = registry.kinds().collect();
        assert_eq!(
            kinds,
            vec![BELONGS_TO, BELONGS_TO_MORPHED, HAS_MANY, HAS_ONE, MANY_TO_MANY]
        );
    }

    #[test]
    fn custom_types_can_be_registered() {
        let mut registry = RelationRegistry::new();
        assert!(matches!(
            registry.factory(HAS_ONE),
            Err(OrmError::RelationResolution(_))
        ));
        let builtin = *RelationRegistry::with_defaults().factory(HAS_MANY).unwrap();
        registry.register("owns_many", builtin);
        assert!(registry.has("owns_many"));
        assert!(!registry.has(HAS_MANY));
    }
}
