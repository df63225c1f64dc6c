//! Many to many relations stored in a pivot table.

use indexmap::IndexMap;
use spire_dbal::{AbstractType, Filter, InsertQuery, SelectQuery, SqlValue};

use super::{
    ensure_column, ensure_foreign_key, join_on, key_name, Loader, Relation, RelationFactory,
};
use crate::error::{OrmError, Result};
use crate::record::Record;
use crate::schema::{
    NormalizedRelation, PivotDefinition, RecordSchema, RelationContext, RelationDefinition,
    PIVOT_DATA,
};

pub(crate) const MANY_TO_MANY_FACTORY: RelationFactory = RelationFactory {
    schema,
    relation: many_to_many,
    loader: many_to_many_loader,
};

fn many_to_many(relation: &NormalizedRelation) -> Box<dyn Relation> {
    Box::new(ManyToMany::new(relation.clone()))
}

#[allow(clippy::unnecessary_wraps)]
fn many_to_many_loader(
    owner: &RecordSchema,
    relation: &NormalizedRelation,
) -> Result<Box<dyn Loader>> {
    Ok(Box::new(ManyToManyLoader::new(owner, relation.clone())))
}

fn key_type(context: &RelationContext<'_>, class: &str, key: &str) -> Result<AbstractType> {
    Ok(context
        .record(class)?
        .columns()
        .get(key)
        .map_or(AbstractType::Integer, |column| column.abstract_type)
        .referencing_type())
}

/// Declares the pivot table in the parent's database.
///
/// The pivot is named after both roles in alphabetical order with a
/// `_map` suffix. Its key columns default to `{role}_{key}` for each side
/// and carry a unique index over the pair.
fn schema(context: &mut RelationContext<'_>) -> Result<NormalizedRelation> {
    let relation = context.relation().clone();
    let owner = context.class().to_string();

    let inner_key = match &relation.inner_key {
        Some(key) => key.clone(),
        None => context.primary_key(&owner)?.0,
    };
    let outer_key = match &relation.outer_key {
        Some(key) => key.clone(),
        None => context.primary_key(&relation.target)?.0,
    };
    let inner_type = key_type(context, &owner, &inner_key)?;
    let outer_type = key_type(context, &relation.target, &outer_key)?;

    let owner_record = context.record(&owner)?;
    let owner_role = owner_record.role.clone();
    let owner_table = owner_record.table.clone();
    let target = context.record(&relation.target)?;
    let target_role = target.role.clone();
    let target_table = target.table.clone();
    let target_database = target.database.clone();

    let pivot_table = relation.pivot_table.clone().unwrap_or_else(|| {
        let mut roles = [owner_role.as_str(), target_role.as_str()];
        roles.sort_unstable();
        format!("{}_{}_map", roles[0], roles[1])
    });
    let thought_inner = relation
        .thought_inner_key
        .clone()
        .unwrap_or_else(|| key_name(&owner_role, &inner_key));
    let thought_outer = relation
        .thought_outer_key
        .clone()
        .unwrap_or_else(|| key_name(&target_role, &outer_key));
    if thought_inner == thought_outer {
        return Err(OrmError::Configuration(format!(
            "relation \"{}\" of \"{owner}\" needs distinct pivot keys, both resolve to \"{thought_inner}\"",
            context.name()
        )));
    }

    let database = context.database_of(&owner)?.to_string();
    let same_database = context.same_database(&owner, &relation.target)?;

    let table = context.database_table(&database, &pivot_table)?;
    ensure_column(table, &thought_inner, inner_type, false);
    ensure_column(table, &thought_outer, outer_type, false);
    if let Some(morph_key) = &relation.morph_key {
        ensure_column(table, morph_key, AbstractType::String, false);
    }
    for (column, abstract_type) in &relation.pivot_columns {
        ensure_column(table, column, *abstract_type, true);
    }
    if relation.create_indexes {
        let mut columns = vec![thought_inner.as_str(), thought_outer.as_str()];
        if let Some(morph_key) = &relation.morph_key {
            columns.push(morph_key);
        }
        table.unique(&columns);
    }
    if relation.constraint {
        if relation.morph_key.is_none() {
            ensure_foreign_key(table, &thought_inner, &owner_table, &inner_key, relation.on_delete);
        }
        if same_database {
            ensure_foreign_key(table, &thought_outer, &target_table, &outer_key, relation.on_delete);
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
            pivot: Some(PivotDefinition {
                table: pivot_table,
                inner_key: thought_inner,
                outer_key: thought_outer,
                columns: relation.pivot_columns.keys().cloned().collect(),
            }),
            morph_targets: IndexMap::new(),
            nullable: true,
        },
        database: target_database,
    })
}

fn pivot(relation: &NormalizedRelation) -> Option<&PivotDefinition> {
    relation.definition.pivot.as_ref()
}

/// Runtime many to many relation.
#[derive(Debug, Clone)]
pub struct ManyToMany {
    relation: NormalizedRelation,
}

impl ManyToMany {
    /// Binds a normalized many to many relation.
    #[must_use]
    pub const fn new(relation: NormalizedRelation) -> Self {
        Self { relation }
    }
}

impl Relation for ManyToMany {
    fn schema(&self) -> &NormalizedRelation {
        &self.relation
    }

    fn is_many(&self) -> bool {
        true
    }

    fn target(&self, _parent: &Record) -> Result<String> {
        Ok(self.relation.definition.target.clone())
    }

    /// `outer IN (SELECT pivot.outer FROM pivot WHERE pivot.inner = ?)`.
    fn selector(&self, parent: &Record) -> Result<Option<SelectQuery>> {
        let definition = &self.relation.definition;
        let Some(pivot) = pivot(&self.relation) else {
            return Ok(None);
        };
        let value = parent.field(&definition.inner_key);
        if value.is_null() {
            return Ok(None);
        }
        let links = SelectQuery::from(&pivot.table)
            .columns(&[format!("{}.{}", pivot.table, pivot.outer_key)])
            .where_eq(&format!("{}.{}", pivot.table, pivot.inner_key), value);
        let links = match &definition.morph_key {
            Some(morph_key) => {
                links.where_eq(&format!("{}.{morph_key}", pivot.table), parent.role())
            }
            None => links,
        };
        let table = &self.relation.table;
        Ok(Some(SelectQuery::from(table).where_in_query(
            &format!("{table}.{}", definition.outer_key),
            links,
        )))
    }

    fn mount(&self, _parent: &mut Record, _related: &mut Record) -> bool {
        false
    }

    fn link(&self, parent: &Record, related: &Record, data: &[(String, SqlValue)]) -> Option<InsertQuery> {
        let definition = &self.relation.definition;
        let pivot = pivot(&self.relation)?;
        let inner = parent.field(&definition.inner_key);
        let outer = related.field(&definition.outer_key);
        if inner.is_null() || outer.is_null() {
            return None;
        }
        let mut insert = InsertQuery::new(&pivot.table)
            .set(&pivot.inner_key, inner)
            .set(&pivot.outer_key, outer);
        if let Some(morph_key) = &definition.morph_key {
            insert = insert.set(morph_key, parent.role());
        }
        for (column, value) in data {
            if pivot.columns.contains(column) {
                insert = insert.set(column, value);
            }
        }
        Some(insert)
    }
}

/// Eager loader of many to many relations. Post-loaded rows carry the
/// pivot columns as `@pivot.{column}`.
#[derive(Debug, Clone)]
pub struct ManyToManyLoader {
    relation: NormalizedRelation,
    role: String,
}

impl ManyToManyLoader {
    /// Loader for `relation` declared by `owner`.
    #[must_use]
    pub fn new(owner: &RecordSchema, relation: NormalizedRelation) -> Self {
        Self {
            relation,
            role: owner.role.clone(),
        }
    }
}

impl Loader for ManyToManyLoader {
    fn schema(&self) -> &NormalizedRelation {
        &self.relation
    }

    fn is_many(&self) -> bool {
        true
    }

    fn parent_key(&self) -> &str {
        &self.relation.definition.inner_key
    }

    fn reference(&self) -> String {
        pivot(&self.relation).map_or_else(String::new, |pivot| {
            format!("{PIVOT_DATA}.{}", pivot.inner_key)
        })
    }

    fn join(&self, query: SelectQuery, parent_alias: &str, alias: &str) -> SelectQuery {
        let definition = &self.relation.definition;
        let Some(pivot) = pivot(&self.relation) else {
            return query;
        };
        let pivot_alias = format!("{alias}_pivot");
        let morph = definition
            .morph_key
            .as_ref()
            .map(|morph_key| (format!("{pivot_alias}.{morph_key}"), self.role.clone()));
        query
            .left_join(&format!("{} AS {pivot_alias}", pivot.table), |on| {
                join_on(
                    on,
                    &format!("{pivot_alias}.{}", pivot.inner_key),
                    &format!("{parent_alias}.{}", definition.inner_key),
                    morph,
                )
            })
            .left_join(&format!("{} AS {alias}", self.relation.table), |on| {
                join_on(
                    on,
                    &format!("{alias}.{}", definition.outer_key),
                    &format!("{pivot_alias}.{}", pivot.outer_key),
                    None,
                )
            })
    }

    fn post_load(&self, parent_keys: &[SqlValue]) -> SelectQuery {
        let definition = &self.relation.definition;
        let table = &self.relation.table;
        let Some(pivot) = pivot(&self.relation) else {
            return SelectQuery::from(table).where_in(&format!("{table}.{}", definition.outer_key), parent_keys);
        };
        let mut columns = vec![
            format!("{table}.*"),
            format!("{0}.{1} AS {PIVOT_DATA}.{1}", pivot.table, pivot.inner_key),
        ];
        columns.extend(
            pivot
                .columns
                .iter()
                .map(|column| format!("{0}.{column} AS {PIVOT_DATA}.{column}", pivot.table)),
        );
        let query = SelectQuery::from(table)
            .columns(&columns)
            .inner_join(&pivot.table, |on| {
                on.on(
                    &format!("{}.{}", pivot.table, pivot.outer_key),
                    "=",
                    &format!("{table}.{}", definition.outer_key),
                )
            })
            .where_in(&format!("{}.{}", pivot.table, pivot.inner_key), parent_keys);
        match &definition.morph_key {
            Some(morph_key) => {
                query.where_eq(&format!("{}.{morph_key}", pivot.table), self.role.as_str())
            }
            None => query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::RelationRegistry;
    use crate::schema::{RecordDeclaration, SchemaBuilder};
    use spire_dbal::DatabasesConfig;

    fn declarations() -> Vec<RecordDeclaration> {
        let mut post = RecordDeclaration::new("Post");
        post.primary("id");
        post.many_to_many("tags", "Tag")
            .pivot_column("position", AbstractType::Integer);
        let mut tag = RecordDeclaration::new("Tag");
        tag.primary("id");
        vec![post, tag]
    }

    #[test]
    fn pivot_table_is_declared() {
        let config = DatabasesConfig::default().database("default", "sqlite::memory:", "");
        let builder =
            SchemaBuilder::new(declarations(), &config, &RelationRegistry::with_defaults())
                .unwrap();
        let pivot = builder.databases()["default"].get("post_tag_map").unwrap().declared();
        let columns: Vec<&String> = pivot.columns.keys().collect();
        assert_eq!(columns, vec!["post_id", "tag_id", "position"]);
        assert!(pivot.indexes[0].unique);
        assert_eq!(pivot.foreign_keys.len(), 2);
        assert!(pivot.column("position").unwrap().nullable);

        let schema = builder.normalize_schema();
        let definition = &schema["Post"].relations["tags"].definition;
        let pivot = definition.pivot.as_ref().unwrap();
        assert_eq!(pivot.inner_key, "post_id");
        assert_eq!(pivot.outer_key, "tag_id");
        assert_eq!(pivot.columns, vec!["position"]);
    }

    #[test]
    fn self_reference_needs_explicit_keys() {
        let mut user = RecordDeclaration::new("User");
        user.primary("id");
        user.many_to_many("friends", "User");
        let config = DatabasesConfig::default().database("default", "sqlite::memory:", "");
        let err = SchemaBuilder::new([user], &config, &RelationRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
    }
}
