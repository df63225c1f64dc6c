//! Builds table schemas and the normalized schema from record declarations.

use std::collections::HashMap;

use indexmap::IndexMap;
use spire_dbal::{
    AbstractType, DatabaseManager, DatabasesConfig, Driver, SchemaBuilder as DatabaseSchema,
    SyncReport, TableSchema,
};
use tracing::{debug, info};

use super::{NormalizedRelation, NormalizedSchema, RecordDeclaration, RecordSchema, RelationDeclaration};
use crate::error::{OrmError, Result};
use crate::relations::RelationRegistry;

/// One schema-build pass over a set of record declarations.
///
/// Declaring a record declares its table in the DBAL schema builder of its
/// database. Relation schemas then add the key columns, indexes, foreign
/// keys and pivot tables each relation needs.
#[derive(Debug)]
pub struct SchemaBuilder {
    records: IndexMap<String, RecordDeclaration>,
    databases: IndexMap<String, DatabaseSchema>,
    resolved: HashMap<String, String>,
    relations: IndexMap<String, IndexMap<String, NormalizedRelation>>,
}

impl SchemaBuilder {
    /// Declares every record and resolves its relations through `registry`.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] for duplicate classes or roles and
    /// relations to undefined records, [`OrmError::RelationResolution`]
    /// for unregistered relation types, and configuration errors for
    /// unknown databases.
    pub fn new(
        declarations: impl IntoIterator<Item = RecordDeclaration>,
        databases: &DatabasesConfig,
        registry: &RelationRegistry,
    ) -> Result<Self> {
        let mut builder = Self {
            records: IndexMap::new(),
            databases: IndexMap::new(),
            resolved: HashMap::new(),
            relations: IndexMap::new(),
        };

        for declaration in declarations {
            builder.declare(declaration, databases)?;
        }

        let classes: Vec<String> = builder.records.keys().cloned().collect();
        for class in classes {
            let relations = builder.records[&class].relations().clone();
            for (name, relation) in &relations {
                let factory = registry.factory(&relation.kind)?;
                let mut context = RelationContext {
                    builder: &mut builder,
                    class: &class,
                    name,
                    relation,
                };
                let normalized = (factory.schema)(&mut context)?;
                debug!(record = %class, relation = %name, kind = %relation.kind, "Resolved relation");
                builder
                    .relations
                    .entry(class.clone())
                    .or_default()
                    .insert(name.clone(), normalized);
            }
        }
        Ok(builder)
    }

    fn declare(&mut self, declaration: RecordDeclaration, databases: &DatabasesConfig) -> Result<()> {
        if self.records.contains_key(&declaration.class) {
            return Err(OrmError::Configuration(format!(
                "record \"{}\" is declared twice",
                declaration.class
            )));
        }
        if let Some(other) = self.records.values().find(|r| r.role == declaration.role) {
            return Err(OrmError::Configuration(format!(
                "role \"{}\" is used by \"{}\" and \"{}\"",
                declaration.role, other.class, declaration.class
            )));
        }

        let database = databases.resolve(declaration.database.as_deref())?;
        let prefix = databases.get(Some(database.as_str()))?.prefix.clone();
        let table = self
            .databases
            .entry(database.clone())
            .or_insert_with(|| DatabaseSchema::new(prefix))
            .table(&declaration.table);

        table.passive(declaration.passive);
        for (name, column) in declaration.columns() {
            *table.column(name, column.abstract_type) = column.clone();
        }
        for index in declaration.indexes() {
            *table.index(index.columns.as_slice()) = index.clone();
        }

        self.resolved.insert(declaration.class.clone(), database);
        self.records.insert(declaration.class.clone(), declaration);
        Ok(())
    }

    /// Declaration of `class`.
    #[must_use]
    pub fn record(&self, class: &str) -> Option<&RecordDeclaration> {
        self.records.get(class)
    }

    /// Table schema of `class`.
    #[must_use]
    pub fn table(&self, class: &str) -> Option<&TableSchema> {
        let record = self.records.get(class)?;
        self.databases
            .get(self.resolved.get(class)?)?
            .get(&record.table)
    }

    /// DBAL schema builders by resolved database name.
    #[must_use]
    pub const fn databases(&self) -> &IndexMap<String, DatabaseSchema> {
        &self.databases
    }

    /// Introspects and synchronizes every database.
    ///
    /// Every database is introspected and planned before any statement
    /// runs, so a forbidden change anywhere leaves all of them untouched.
    /// Plans then run one database after another. A failing table stops the
    /// pass and tables already handled stay applied.
    ///
    /// # Errors
    ///
    /// The first DBAL error.
    pub async fn synchronize<D: Driver>(
        &mut self,
        databases: &DatabaseManager<D>,
    ) -> Result<Vec<SyncReport>> {
        let mut plans = Vec::with_capacity(self.databases.len());
        for (name, schema) in &mut self.databases {
            let database = databases.database(Some(name.as_str()))?;
            schema.introspect(database).await?;
            let plan = schema.plan(database.dialect())?;
            debug!(database = %name, tables = plan.tables.len(), "Planned record tables");
            plans.push((name, database, plan));
        }

        let mut reports = Vec::with_capacity(plans.len());
        for (name, database, plan) in plans {
            let report = DatabaseSchema::execute(&plan, database).await?;
            info!(
                database = %name,
                created = report.created.len(),
                altered = report.altered.len(),
                "Synchronized record tables"
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// The normalized schema of every record, in declaration order.
    #[must_use]
    pub fn normalize_schema(&self) -> NormalizedSchema {
        let mut schema = NormalizedSchema::new();
        for (class, record) in &self.records {
            let Some(table) = self.table(class) else {
                continue;
            };
            let declared = table.declared();
            schema.insert(
                class.clone(),
                RecordSchema {
                    role: record.role.clone(),
                    source: record.source.clone(),
                    table: record.table.clone(),
                    database: record.database.clone(),
                    hidden: record.hidden_fields().to_vec(),
                    secured: record.secured_fields().to_vec(),
                    fillable: record.fillable_fields().to_vec(),
                    mutators: record.mutators().clone(),
                    validates: record.validates().clone(),
                    columns: declared
                        .columns
                        .iter()
                        .map(|(name, column)| (name.clone(), column.abstract_type))
                        .collect(),
                    nullable: declared
                        .columns
                        .values()
                        .filter(|column| column.nullable)
                        .map(|column| column.name.clone())
                        .collect(),
                    relations: self.relations.get(class).cloned().unwrap_or_default(),
                    primary_key: declared.primary_keys.first().cloned(),
                },
            );
        }
        schema
    }
}

/// What a relation schema sees while its relation is resolved.
#[derive(Debug)]
pub struct RelationContext<'a> {
    builder: &'a mut SchemaBuilder,
    class: &'a str,
    name: &'a str,
    relation: &'a RelationDeclaration,
}

impl RelationContext<'_> {
    /// Class declaring the relation.
    #[must_use]
    pub fn class(&self) -> &str {
        self.class
    }

    /// Relation name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// The relation as declared.
    #[must_use]
    pub fn relation(&self) -> &RelationDeclaration {
        self.relation
    }

    /// Declaration of `class`.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] when `class` is not declared.
    pub fn record(&self, class: &str) -> Result<&RecordDeclaration> {
        self.builder.records.get(class).ok_or_else(|| {
            OrmError::Configuration(format!(
                "relation \"{}\" of \"{}\" points to undefined record \"{class}\"",
                self.name, self.class
            ))
        })
    }

    /// Primary key name and type of `class`.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] when `class` is undefined or has no
    /// auto-incrementing primary key.
    pub fn primary_key(&self, class: &str) -> Result<(String, AbstractType)> {
        let record = self.record(class)?;
        record
            .primary_key()
            .map(|column| (column.name.clone(), column.abstract_type))
            .ok_or_else(|| {
                OrmError::Configuration(format!(
                    "relation \"{}\" of \"{}\" needs a primary key on \"{class}\"",
                    self.name, self.class
                ))
            })
    }

    /// Resolved database of `class`.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] when `class` is not declared.
    pub fn database_of(&self, class: &str) -> Result<&str> {
        self.record(class)?;
        self.builder
            .resolved
            .get(class)
            .map(String::as_str)
            .ok_or_else(|| OrmError::Configuration(format!("undefined record \"{class}\"")))
    }

    /// Whether both records live in the same database.
    ///
    /// # Errors
    ///
    /// See [`database_of`](Self::database_of).
    pub fn same_database(&self, a: &str, b: &str) -> Result<bool> {
        Ok(self.database_of(a)? == self.database_of(b)?)
    }

    /// Table schema of `class`.
    ///
    /// # Errors
    ///
    /// See [`database_of`](Self::database_of).
    pub fn table(&mut self, class: &str) -> Result<&mut TableSchema> {
        let database = self.database_of(class)?.to_string();
        let table = self.record(class)?.table.clone();
        self.database_table(&database, &table)
    }

    /// Table `table` of resolved database `database`, declared on first
    /// access.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] when no record lives in `database`.
    pub fn database_table(&mut self, database: &str, table: &str) -> Result<&mut TableSchema> {
        self.builder
            .databases
            .get_mut(database)
            .map(|schema| schema.table(table))
            .ok_or_else(|| OrmError::Configuration(format!("undefined database \"{database}\"")))
    }
}

/// Hash of the declarations, used to tell whether a cached normalized
/// schema is stale.
///
/// # Errors
///
/// [`OrmError::Serialization`] when a declaration cannot be encoded.
pub fn fingerprint<'a>(declarations: impl IntoIterator<Item = &'a RecordDeclaration>) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    for declaration in declarations {
        hasher.update(&serde_json::to_vec(declaration)?);
        hasher.update(b"\n");
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabasesConfig {
        DatabasesConfig::default()
            .database("default", "sqlite::memory:", "app_")
            .database("logs", "sqlite::memory:", "")
            .alias("archive", "logs")
    }

    fn user() -> RecordDeclaration {
        let mut user = RecordDeclaration::new("User");
        user.primary("id");
        user.string("name", 64);
        user
    }

    #[test]
    fn records_are_declared_in_their_database() {
        let mut entry = RecordDeclaration::new("Entry").with_database("archive");
        entry.primary("id");
        let builder =
            SchemaBuilder::new([user(), entry], &config(), &RelationRegistry::with_defaults())
                .unwrap();

        assert_eq!(builder.table("User").unwrap().real_name(), "app_users");
        assert_eq!(builder.table("Entry").unwrap().real_name(), "entries");
        let names: Vec<&String> = builder.databases().keys().collect();
        assert_eq!(names, vec!["default", "logs"]);
    }

    #[test]
    fn duplicate_roles_are_rejected() {
        let other = RecordDeclaration::new("admin::User");
        let err = SchemaBuilder::new([user(), other], &config(), &RelationRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
    }

    #[test]
    fn unknown_relation_type_is_a_resolution_error() {
        let mut post = RecordDeclaration::new("Post");
        post.primary("id");
        post.relation("owner", "owned_by", "User");
        let err = SchemaBuilder::new([user(), post], &config(), &RelationRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, OrmError::RelationResolution(message) if message.contains("owned_by")));
    }

    #[test]
    fn fingerprint_follows_declarations() {
        let first = fingerprint(&[user()]).unwrap();
        assert_eq!(first, fingerprint(&[user()]).unwrap());

        let mut changed = user();
        changed.boolean("admin");
        assert_ne!(first, fingerprint(&[changed]).unwrap());
    }
}
