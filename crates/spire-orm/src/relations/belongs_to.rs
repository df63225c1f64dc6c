//! Belongs-to relations: the parent holds the key.

use indexmap::IndexMap;
use spire_dbal::{AbstractType, Filter, SelectQuery, SqlValue};

use super::{
    ensure_column, ensure_foreign_key, join_on, key_name, Loader, Relation, RelationFactory,
};
use crate::error::{OrmError, Result};
use crate::record::Record;
use crate::schema::{
    MorphTarget, NormalizedRelation, RecordSchema, RelationContext, RelationDefinition,
};

pub(crate) const BELONGS_TO_FACTORY: RelationFactory = RelationFactory {
    schema,
    relation: belongs_to,
    loader: belongs_to_loader,
};

pub(crate) const BELONGS_TO_MORPHED_FACTORY: RelationFactory = RelationFactory {
    schema: morphed_schema,
    relation: belongs_to_morphed,
    loader: morphed_loader,
};

fn belongs_to(relation: &NormalizedRelation) -> Box<dyn Relation> {
    Box::new(BelongsTo::new(relation.clone()))
}

fn belongs_to_morphed(relation: &NormalizedRelation) -> Box<dyn Relation> {
    Box::new(BelongsToMorphed::new(relation.clone()))
}

#[allow(clippy::unnecessary_wraps)]
fn belongs_to_loader(_owner: &RecordSchema, relation: &NormalizedRelation) -> Result<Box<dyn Loader>> {
    Ok(Box::new(BelongsToLoader::new(relation.clone())))
}

fn morphed_loader(owner: &RecordSchema, relation: &NormalizedRelation) -> Result<Box<dyn Loader>> {
    Err(OrmError::RelationResolution(format!(
        "relation of \"{}\" to several record classes cannot be eager loaded ({})",
        owner.role, relation.definition.inner_key
    )))
}

/// Declares the inner key on the parent table.
///
/// The outer key defaults to the target primary key and the inner key to
/// `{target_role}_{outer_key}`. The key column is nullable unless declared
/// otherwise.
fn schema(context: &mut RelationContext<'_>) -> Result<NormalizedRelation> {
    let relation = context.relation().clone();
    let owner = context.class().to_string();

    let outer_key = match &relation.outer_key {
        Some(key) => key.clone(),
        None => context.primary_key(&relation.target)?.0,
    };
    let target = context.record(&relation.target)?;
    let target_role = target.role.clone();
    let target_table = target.table.clone();
    let target_database = target.database.clone();
    let key_type = target
        .columns()
        .get(&outer_key)
        .map_or(AbstractType::Integer, |column| column.abstract_type)
        .referencing_type();

    let inner_key = relation
        .inner_key
        .clone()
        .unwrap_or_else(|| key_name(&target_role, &outer_key));
    let nullable = relation.nullable.unwrap_or(true);
    let same_database = context.same_database(&owner, &relation.target)?;

    let table = context.table(&owner)?;
    ensure_column(table, &inner_key, key_type, nullable);
    if relation.create_indexes {
        table.index(&[inner_key.as_str()]);
    }
    if relation.constraint && same_database {
        ensure_foreign_key(table, &inner_key, &target_table, &outer_key, relation.on_delete);
    }

    Ok(NormalizedRelation {
        kind: relation.kind.clone(),
        table: target_table,
        definition: RelationDefinition {
            target: relation.target.clone(),
            inner_key,
            outer_key,
            morph_key: None,
            pivot: None,
            morph_targets: IndexMap::new(),
            nullable,
        },
        database: target_database,
    })
}

/// Declares `{name}_id` and `{name}_type` on the parent table and records
/// the table and key of every candidate class by role.
fn morphed_schema(context: &mut RelationContext<'_>) -> Result<NormalizedRelation> {
    let relation = context.relation().clone();
    let owner = context.class().to_string();
    let name = context.name().to_string();
    if relation.targets.is_empty() {
        return Err(OrmError::Configuration(format!(
            "relation \"{name}\" of \"{owner}\" has no target classes"
        )));
    }

    let mut morph_targets = IndexMap::new();
    let mut key_type = None;
    for class in &relation.targets {
        let key = match &relation.outer_key {
            Some(key) => key.clone(),
            None => context.primary_key(class)?.0,
        };
        let target = context.record(class)?;
        let column_type = target
            .columns()
            .get(&key)
            .map_or(AbstractType::Integer, |column| column.abstract_type)
            .referencing_type();
        key_type.get_or_insert(column_type);
        morph_targets.insert(
            target.role.clone(),
            MorphTarget {
                class: class.clone(),
                table: target.table.clone(),
                key,
            },
        );
    }
    let outer_key = morph_targets
        .values()
        .next()
        .map(|target| target.key.clone())
        .unwrap_or_default();

    let inner_key = relation
        .inner_key
        .clone()
        .unwrap_or_else(|| key_name(&name, "id"));
    let morph_key = relation
        .morph_key
        .clone()
        .unwrap_or_else(|| key_name(&name, "type"));
    let nullable = relation.nullable.unwrap_or(true);

    let table = context.table(&owner)?;
    ensure_column(table, &inner_key, key_type.unwrap_or(AbstractType::Integer), nullable);
    ensure_column(table, &morph_key, AbstractType::String, nullable);
    if relation.create_indexes {
        table.index(&[inner_key.as_str(), morph_key.as_str()]);
    }

    Ok(NormalizedRelation {
        kind: relation.kind.clone(),
        table: String::new(),
        definition: RelationDefinition {
            target: String::new(),
            inner_key,
            outer_key,
            morph_key: Some(morph_key),
            pivot: None,
            morph_targets,
            nullable,
        },
        database: None,
    })
}

/// Runtime belongs-to relation.
#[derive(Debug, Clone)]
pub struct BelongsTo {
    relation: NormalizedRelation,
}

impl BelongsTo {
    /// Binds a normalized belongs-to relation.
    #[must_use]
    pub const fn new(relation: NormalizedRelation) -> Self {
        Self { relation }
    }
}

impl Relation for BelongsTo {
    fn schema(&self) -> &NormalizedRelation {
        &self.relation
    }

    fn is_many(&self) -> bool {
        false
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
        Ok(Some(
            SelectQuery::from(table)
                .where_eq(&format!("{table}.{}", definition.outer_key), value)
                .limit(1),
        ))
    }

    fn mount(&self, parent: &mut Record, related: &mut Record) -> bool {
        let definition = &self.relation.definition;
        let key = related
            .raw_field(&definition.outer_key)
            .cloned()
            .unwrap_or(SqlValue::Null);
        if parent
            .raw_field(&definition.inner_key)
            .is_some_and(|current| current.loosely_equals(&key))
        {
            return false;
        }
        parent.set_field(&definition.inner_key, key, false);
        true
    }
}

/// Eager loader of belongs-to relations.
#[derive(Debug, Clone)]
pub struct BelongsToLoader {
    relation: NormalizedRelation,
}

impl BelongsToLoader {
    /// Loader for `relation`.
    #[must_use]
    pub const fn new(relation: NormalizedRelation) -> Self {
        Self { relation }
    }
}

impl Loader for BelongsToLoader {
    fn schema(&self) -> &NormalizedRelation {
        &self.relation
    }

    fn is_many(&self) -> bool {
        false
    }

    fn parent_key(&self) -> &str {
        &self.relation.definition.inner_key
    }

    fn reference(&self) -> String {
        self.relation.definition.outer_key.clone()
    }

    fn join(&self, query: SelectQuery, parent_alias: &str, alias: &str) -> SelectQuery {
        let definition = &self.relation.definition;
        query.left_join(&format!("{} AS {alias}", self.relation.table), |on| {
            join_on(
                on,
                &format!("{alias}.{}", definition.outer_key),
                &format!("{parent_alias}.{}", definition.inner_key),
                None,
            )
        })
    }

    fn post_load(&self, parent_keys: &[SqlValue]) -> SelectQuery {
        let table = &self.relation.table;
        SelectQuery::from(table).where_in(
            &format!("{table}.{}", self.relation.definition.outer_key),
            parent_keys,
        )
    }
}

/// Runtime belongs-to whose target class is read from the parent's morph
/// key. Loaded lazily only.
#[derive(Debug, Clone)]
pub struct BelongsToMorphed {
    relation: NormalizedRelation,
}

impl BelongsToMorphed {
    /// Binds a normalized morphed belongs-to relation.
    #[must_use]
    pub const fn new(relation: NormalizedRelation) -> Self {
        Self { relation }
    }

    fn morph_key(&self) -> &str {
        self.relation
            .definition
            .morph_key
            .as_deref()
            .unwrap_or_default()
    }

    fn morph_target(&self, parent: &Record) -> Result<Option<&MorphTarget>> {
        let role = parent.field(self.morph_key());
        let Some(role) = role.as_str() else {
            return Ok(None);
        };
        self.relation
            .definition
            .morph_targets
            .get(role)
            .map(Some)
            .ok_or_else(|| {
                OrmError::Configuration(format!(
                    "\"{role}\" is not a target of relation key \"{}\"",
                    self.relation.definition.inner_key
                ))
            })
    }
}

impl Relation for BelongsToMorphed {
    fn schema(&self) -> &NormalizedRelation {
        &self.relation
    }

    fn is_many(&self) -> bool {
        false
    }

    fn target(&self, parent: &Record) -> Result<String> {
        self.morph_target(parent)?
            .map(|target| target.class.clone())
            .ok_or_else(|| {
                OrmError::Configuration(format!(
                    "\"{}\" of \"{}\" is not set",
                    self.morph_key(),
                    parent.class()
                ))
            })
    }

    fn selector(&self, parent: &Record) -> Result<Option<SelectQuery>> {
        let value = parent.field(&self.relation.definition.inner_key);
        if value.is_null() {
            return Ok(None);
        }
        let Some(target) = self.morph_target(parent)? else {
            return Ok(None);
        };
        Ok(Some(
            SelectQuery::from(&target.table)
                .where_eq(&format!("{}.{}", target.table, target.key), value)
                .limit(1),
        ))
    }

    fn mount(&self, parent: &mut Record, related: &mut Record) -> bool {
        let definition = &self.relation.definition;
        let key = definition
            .morph_targets
            .get(related.role())
            .and_then(|target| related.raw_field(&target.key))
            .cloned()
            .unwrap_or(SqlValue::Null);
        let role = related.role().to_string();
        let mut changed = false;
        if !parent
            .raw_field(&definition.inner_key)
            .is_some_and(|current| current.loosely_equals(&key))
        {
            parent.set_field(&definition.inner_key, key, false);
            changed = true;
        }
        let morph_key = self.morph_key().to_string();
        if parent.raw_field(&morph_key).and_then(SqlValue::as_str) != Some(role.as_str()) {
            parent.set_field(&morph_key, role, false);
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::RelationRegistry;
    use crate::schema::{RecordDeclaration, SchemaBuilder};
    use spire_dbal::DatabasesConfig;

    fn config() -> DatabasesConfig {
        DatabasesConfig::default().database("default", "sqlite::memory:", "")
    }

    fn user() -> RecordDeclaration {
        let mut user = RecordDeclaration::new("User");
        user.primary("id");
        user
    }

    #[test]
    fn inner_key_is_nullable_by_default() {
        let mut post = RecordDeclaration::new("Post");
        post.primary("id");
        post.belongs_to("author", "User");
        let builder =
            SchemaBuilder::new([user(), post], &config(), &RelationRegistry::with_defaults())
                .unwrap();

        let table = builder.table("Post").unwrap().declared();
        assert!(table.column("user_id").unwrap().nullable);
        assert_eq!(table.foreign_keys[0].foreign_key, "id");

        let schema = builder.normalize_schema();
        let definition = &schema["Post"].relations["author"].definition;
        assert_eq!(definition.inner_key, "user_id");
        assert_eq!(definition.outer_key, "id");
    }

    #[test]
    fn morphed_relation_declares_both_columns() {
        let mut image = RecordDeclaration::new("Image");
        image.primary("id");
        image.belongs_to_morphed("owner", &["User", "Post"]);
        let mut post = RecordDeclaration::new("Post");
        post.primary("id");
        let builder = SchemaBuilder::new(
            [user(), post, image],
            &config(),
            &RelationRegistry::with_defaults(),
        )
        .unwrap();

        let table = builder.table("Image").unwrap().declared();
        assert!(table.column("owner_id").is_some());
        assert!(table.column("owner_type").is_some());
        assert!(table.foreign_keys.is_empty());

        let schema = builder.normalize_schema();
        let definition = &schema["Image"].relations["owner"].definition;
        let roles: Vec<&String> = definition.morph_targets.keys().collect();
        assert_eq!(roles, vec!["user", "post"]);
    }

    #[test]
    fn morphed_relation_needs_targets() {
        let mut image = RecordDeclaration::new("Image");
        image.primary("id");
        image.belongs_to_morphed::<&str>("owner", &[]);
        let err = SchemaBuilder::new([image], &config(), &RelationRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
    }
}
