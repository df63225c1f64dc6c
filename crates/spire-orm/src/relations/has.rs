//! Has-one and has-many: the related table holds a key to the parent.

use indexmap::IndexMap;
use spire_dbal::{AbstractType, Filter, SelectQuery, SqlValue};

use super::{
    ensure_column, ensure_foreign_key, join_on, key_name, keyed, Loader, Relation,
    RelationFactory,
};
use crate::error::Result;
use crate::record::Record;
use crate::schema::{NormalizedRelation, RecordSchema, RelationContext, RelationDefinition};

pub(crate) const HAS_ONE_FACTORY: RelationFactory = RelationFactory {
    schema,
    relation: has_one,
    loader: has_one_loader,
};

pub(crate) const HAS_MANY_FACTORY: RelationFactory = RelationFactory {
    schema,
    relation: has_many,
    loader: has_many_loader,
};

fn has_one(relation: &NormalizedRelation) -> Box<dyn Relation> {
    Box::new(Has::new(relation.clone(), false))
}

fn has_many(relation: &NormalizedRelation) -> Box<dyn Relation> {
    Box::new(Has::new(relation.clone(), true))
}

#[allow(clippy::unnecessary_wraps)]
fn has_one_loader(owner: &RecordSchema, relation: &NormalizedRelation) -> Result<Box<dyn Loader>> {
    Ok(Box::new(HasLoader::new(owner, relation.clone(), false)))
}

#[allow(clippy::unnecessary_wraps)]
fn has_many_loader(owner: &RecordSchema, relation: &NormalizedRelation) -> Result<Box<dyn Loader>> {
    Ok(Box::new(HasLoader::new(owner, relation.clone(), true)))
}

/// Declares the outer key on the related table.
///
/// The inner key defaults to the parent primary key and the outer key to
/// `{parent_role}_{inner_key}`. With a morph key the related table also
/// gets a role column and no foreign key, since rows of several parent
/// classes share it.
fn schema(context: &mut RelationContext<'_>) -> Result<NormalizedRelation> {
    let relation = context.relation().clone();
    let owner = context.class().to_string();

    let inner_key = match &relation.inner_key {
        Some(key) => key.clone(),
        None => context.primary_key(&owner)?.0,
    };
    let owner_record = context.record(&owner)?;
    let role = owner_record.role.clone();
    let owner_table = owner_record.table.clone();
    let key_type = owner_record
        .columns()
        .get(&inner_key)
        .map_or(AbstractType::Integer, |column| column.abstract_type)
        .referencing_type();

    let target = context.record(&relation.target)?;
    let target_table = target.table.clone();
    let target_database = target.database.clone();

    let outer_key = relation
        .outer_key
        .clone()
        .unwrap_or_else(|| key_name(&role, &inner_key));
    let nullable = relation.nullable.unwrap_or(false);
    let same_database = context.same_database(&owner, &relation.target)?;

    let table = context.table(&relation.target)?;
    ensure_column(table, &outer_key, key_type, nullable);
    match &relation.morph_key {
        Some(morph_key) => {
            ensure_column(table, morph_key, AbstractType::String, nullable);
            if relation.create_indexes {
                table.index(&[outer_key.as_str(), morph_key.as_str()]);
            }
        }
        None => {
            if relation.create_indexes {
                table.index(&[outer_key.as_str()]);
            }
            if relation.constraint && same_database {
                ensure_foreign_key(table, &outer_key, &owner_table, &inner_key, relation.on_delete);
            }
        }
    }

    Ok(NormalizedRelation {
        kind: relation.kind.clone(),
        table: target_table,
        definition: RelationDefinition {
            target: relation.target.clone(),
            inner_key,
            outer_key,
            morph_key: relation.morph_key.clone(),
            pivot: None,
            morph_targets: IndexMap::new(),
            nullable,
        },
        database: target_database,
    })
}

/// Runtime has-one or has-many relation.
#[derive(Debug, Clone)]
pub struct Has {
    relation: NormalizedRelation,
    many: bool,
}

impl Has {
    /// Binds a normalized has relation.
    #[must_use]
    pub const fn new(relation: NormalizedRelation, many: bool) -> Self {
        Self { relation, many }
    }
}

impl Relation for Has {
    fn schema(&self) -> &NormalizedRelation {
        &self.relation
    }

    fn is_many(&self) -> bool {
        self.many
    }

    fn target(&self, _parent: &Record) -> Result<String> {
        Ok(self.relation.definition.target.clone())
    }

    fn selector(&self, parent: &Record) -> Result<Option<SelectQuery>> {
        let definition = &self.relation.definition;
        let value = parent.field(&definition.inner_key);
        if value.is_null() {
            return Ok(None);
        }
        let table = &self.relation.table;
        let morph_column = definition
            .morph_key
            .as_ref()
            .map(|morph_key| format!("{table}.{morph_key}"));
        let query = keyed(
            SelectQuery::from(table),
            &format!("{table}.{}", definition.outer_key),
            value,
            morph_column.as_deref().map(|column| (column, parent.role())),
        );
        Ok(Some(if self.many { query } else { query.limit(1) }))
    }

    fn mount(&self, parent: &mut Record, related: &mut Record) -> bool {
        let definition = &self.relation.definition;
        let key = parent
            .raw_field(&definition.inner_key)
            .cloned()
            .unwrap_or(SqlValue::Null);
        let mut changed = false;
        if !related
            .raw_field(&definition.outer_key)
            .is_some_and(|current| current.loosely_equals(&key))
        {
            related.set_field(&definition.outer_key, key, false);
            changed = true;
        }
        if let Some(morph_key) = &definition.morph_key {
            let role = parent.role().to_string();
            if related.raw_field(morph_key).and_then(SqlValue::as_str) != Some(role.as_str()) {
                related.set_field(morph_key, role, false);
                changed = true;
            }
        }
        changed
    }
}

/// Eager loader of has relations.
#[derive(Debug, Clone)]
pub struct HasLoader {
    relation: NormalizedRelation,
    many: bool,
    role: String,
}

impl HasLoader {
    /// Loader for `relation` declared by `owner`.
    #[must_use]
    pub fn new(owner: &RecordSchema, relation: NormalizedRelation, many: bool) -> Self {
        Self {
            relation,
            many,
            role: owner.role.clone(),
        }
    }
}

impl Loader for HasLoader {
    fn schema(&self) -> &NormalizedRelation {
        &self.relation
    }

    fn is_many(&self) -> bool {
        self.many
    }

    fn parent_key(&self) -> &str {
        &self.relation.definition.inner_key
    }

    fn reference(&self) -> String {
        self.relation.definition.outer_key.clone()
    }

    fn join(&self, query: SelectQuery, parent_alias: &str, alias: &str) -> SelectQuery {
        let definition = &self.relation.definition;
        let morph = definition
            .morph_key
            .as_ref()
            .map(|morph_key| (format!("{alias}.{morph_key}"), self.role.clone()));
        query.left_join(&format!("{} AS {alias}", self.relation.table), |on| {
            join_on(
                on,
                &format!("{alias}.{}", definition.outer_key),
                &format!("{parent_alias}.{}", definition.inner_key),
                morph,
            )
        })
    }

    fn post_load(&self, parent_keys: &[SqlValue]) -> SelectQuery {
        let definition = &self.relation.definition;
        let table = &self.relation.table;
        let query = SelectQuery::from(table)
            .where_in(&format!("{table}.{}", definition.outer_key), parent_keys);
        match &definition.morph_key {
            Some(morph_key) => query.where_eq(&format!("{table}.{morph_key}"), self.role.as_str()),
            None => query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::RelationRegistry;
    use crate::schema::{Mutators, RecordDeclaration, SchemaBuilder};
    use spire_dbal::{DatabasesConfig, Row};
    use std::sync::Arc;

    fn build(comment: RecordDeclaration) -> SchemaBuilder {
        let mut post = RecordDeclaration::new("Post");
        post.primary("id");
        post.has_many("comments", "Comment");
        let config = DatabasesConfig::default().database("default", "sqlite::memory:", "");
        SchemaBuilder::new([post, comment], &config, &RelationRegistry::with_defaults()).unwrap()
    }

    fn comment() -> RecordDeclaration {
        let mut comment = RecordDeclaration::new("Comment");
        comment.primary("id");
        comment
    }

    #[test]
    fn outer_key_is_declared_on_the_related_table() {
        let builder = build(comment());
        let table = builder.table("Comment").unwrap().declared();
        let column = table.column("post_id").unwrap();
        assert_eq!(column.abstract_type, AbstractType::Integer);
        assert!(!column.nullable);
        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.indexes.len(), 1);
    }

    #[test]
    fn declared_key_column_is_kept() {
        let mut comment = comment();
        comment.big_integer("post_id");
        let builder = build(comment);
        let column = builder.table("Comment").unwrap().declared().column("post_id").unwrap().clone();
        assert_eq!(column.abstract_type, AbstractType::BigInteger);
    }

    fn relation() -> NormalizedRelation {
        let schema = build(comment()).normalize_schema();
        schema["Post"].relations["comments"].clone()
    }

    fn record(class: &str, role: &str, row: Row) -> Record {
        let schema = Arc::new(RecordSchema {
            role: role.to_string(),
            source: None,
            table: format!("{role}s"),
            database: None,
            hidden: Vec::new(),
            secured: Vec::new(),
            fillable: Vec::new(),
            mutators: Mutators::default(),
            validates: IndexMap::new(),
            columns: IndexMap::from([
                (String::from("id"), AbstractType::Primary),
                (String::from("post_id"), AbstractType::Integer),
            ]),
            nullable: Vec::new(),
            relations: IndexMap::new(),
            primary_key: Some(String::from("id")),
        });
        Record::new(class, schema, row, false)
    }

    #[test]
    fn mount_is_idempotent() {
        let has = Has::new(relation(), true);
        let mut row = Row::new();
        row.insert(String::from("id"), SqlValue::Int(4));
        let mut post = record("Post", "post", row);
        let mut comment = record("Comment", "comment", Row::new());

        assert!(has.mount(&mut post, &mut comment));
        assert_eq!(comment.field("post_id"), SqlValue::Int(4));
        assert!(!has.mount(&mut post, &mut comment));
    }

    #[test]
    fn selector_needs_the_parent_key() {
        let has = Has::new(relation(), true);
        let post = record("Post", "post", Row::new());
        assert!(has.selector(&post).unwrap().is_none());
    }
}
