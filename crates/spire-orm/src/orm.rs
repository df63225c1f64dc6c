//! The ORM facade: normalized schema, record factory and persistence.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use spire_dbal::{
    Database, DatabaseManager, DeleteQuery, Driver, Filter, InsertQuery, Row, SqlValue,
    SyncReport, UpdateQuery,
};
use tracing::{debug, info, warn};

use crate::cache::EntityCache;
use crate::config::OrmConfig;
use crate::error::{OrmError, Result};
use crate::memory::Memory;
use crate::record::{Record, Related};
use crate::relations::{Loader, Relation, RelationRegistry};
use crate::schema::{
    fingerprint, NormalizedRelation, NormalizedSchema, RecordDeclaration, RecordSchema,
    SchemaBuilder,
};
use crate::selector::Selector;

/// Normalized schema as saved in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSchema {
    fingerprint: String,
    records: NormalizedSchema,
}

/// Entry point of the ORM.
///
/// Holds the record declarations and the normalized schema derived from
/// them. The schema is read from memory when its fingerprint matches the
/// declarations, and rebuilt and saved otherwise.
pub struct Orm<D: Driver> {
    config: OrmConfig,
    databases: DatabaseManager<D>,
    memory: Box<dyn Memory>,
    registry: RelationRegistry,
    declarations: Vec<RecordDeclaration>,
    fingerprint: String,
    schema: IndexMap<String, Arc<RecordSchema>>,
    cache: Mutex<EntityCache>,
}

impl<D: Driver> Orm<D> {
    /// Creates an ORM with the built-in relation types.
    ///
    /// # Errors
    ///
    /// Memory errors, and schema build errors when the cached schema is
    /// missing or stale.
    pub fn new(
        config: OrmConfig,
        databases: DatabaseManager<D>,
        memory: impl Memory + 'static,
        declarations: impl IntoIterator<Item = RecordDeclaration>,
    ) -> Result<Self> {
        Self::with_registry(
            config,
            databases,
            memory,
            declarations,
            RelationRegistry::with_defaults(),
        )
    }

    /// Creates an ORM resolving relation types through `registry`.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_registry(
        config: OrmConfig,
        databases: DatabaseManager<D>,
        memory: impl Memory + 'static,
        declarations: impl IntoIterator<Item = RecordDeclaration>,
        registry: RelationRegistry,
    ) -> Result<Self> {
        let declarations: Vec<RecordDeclaration> = declarations.into_iter().collect();
        let fingerprint = fingerprint(&declarations)?;
        let cache = EntityCache::new(config.entity_cache, config.cache_capacity);
        let mut orm = Self {
            config,
            databases,
            memory: Box::new(memory),
            registry,
            declarations,
            fingerprint,
            schema: IndexMap::new(),
            cache: Mutex::new(cache),
        };

        match orm.cached_schema()? {
            Some(records) => {
                debug!(records = records.len(), "Loaded record schema from memory");
                orm.set_schema(records);
            }
            None => {
                let records = orm.schema_builder()?.normalize_schema();
                orm.save_schema(records)?;
            }
        }
        Ok(orm)
    }

    fn cached_schema(&self) -> Result<Option<NormalizedSchema>> {
        let Some(data) = self.memory.load_data(&self.config.schema_key)? else {
            return Ok(None);
        };
        match serde_json::from_value::<CachedSchema>(data) {
            Ok(cached) if cached.fingerprint == self.fingerprint => Ok(Some(cached.records)),
            Ok(_) => {
                warn!(section = %self.config.schema_key, "Cached record schema is stale");
                Ok(None)
            }
            Err(e) => {
                warn!(section = %self.config.schema_key, error = %e, "Cached record schema is unreadable");
                Ok(None)
            }
        }
    }

    fn save_schema(&mut self, records: NormalizedSchema) -> Result<()> {
        let cached = CachedSchema {
            fingerprint: self.fingerprint.clone(),
            records,
        };
        self.memory
            .save_data(&self.config.schema_key, &serde_json::to_value(&cached)?)?;
        info!(records = cached.records.len(), "Built record schema");
        self.set_schema(cached.records);
        Ok(())
    }

    fn set_schema(&mut self, records: NormalizedSchema) {
        self.schema = records
            .into_iter()
            .map(|(class, schema)| (class, Arc::new(schema)))
            .collect();
        self.cache().clear();
    }

    fn cache(&self) -> MutexGuard<'_, EntityCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ORM settings.
    #[must_use]
    pub const fn config(&self) -> &OrmConfig {
        &self.config
    }

    /// Relation types known to this ORM.
    #[must_use]
    pub const fn registry(&self) -> &RelationRegistry {
        &self.registry
    }

    /// Record declarations.
    #[must_use]
    pub fn declarations(&self) -> &[RecordDeclaration] {
        &self.declarations
    }

    /// Database `name` (or alias), the default one when `None`.
    ///
    /// # Errors
    ///
    /// DBAL configuration errors for unknown or unconnected databases.
    pub fn database(&self, name: Option<&str>) -> Result<&Database<D>> {
        Ok(self.databases.database(name)?)
    }

    /// Connected databases.
    #[must_use]
    pub const fn databases(&self) -> &DatabaseManager<D> {
        &self.databases
    }

    /// Normalized schema of `class`.
    ///
    /// # Errors
    ///
    /// [`OrmError::UndefinedRecord`] when `class` is not declared.
    pub fn schema(&self, class: &str) -> Result<Arc<RecordSchema>> {
        self.schema
            .get(class)
            .cloned()
            .ok_or_else(|| OrmError::UndefinedRecord(class.to_string()))
    }

    /// Declared classes.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.schema.keys().map(String::as_str)
    }

    /// A fresh schema build over the declarations.
    ///
    /// # Errors
    ///
    /// Declaration and relation resolution errors.
    pub fn schema_builder(&self) -> Result<SchemaBuilder> {
        SchemaBuilder::new(
            self.declarations.iter().cloned(),
            self.databases.config(),
            &self.registry,
        )
    }

    /// Rebuilds the normalized schema and saves it to memory. With
    /// `synchronize` the record tables are brought in line with the
    /// declarations first. The entity cache is emptied.
    ///
    /// # Errors
    ///
    /// Schema build, DBAL and memory errors.
    pub async fn update_schema(&mut self, synchronize: bool) -> Result<Vec<SyncReport>> {
        let mut builder = self.schema_builder()?;
        let reports = if synchronize {
            builder.synchronize(&self.databases).await?
        } else {
            Vec::new()
        };
        self.save_schema(builder.normalize_schema())?;
        Ok(reports)
    }

    /// Creates a record of `class` from `data`. With `cache` and the entity
    /// cache enabled, records with a primary key are remembered.
    ///
    /// # Errors
    ///
    /// [`OrmError::UndefinedRecord`] when `class` is not declared.
    pub fn record(&self, class: &str, data: Row, cache: bool) -> Result<Record> {
        let schema = self.schema(class)?;
        let loaded = schema
            .primary_key
            .as_ref()
            .and_then(|key| data.get(key))
            .is_some_and(|value| !value.is_null());
        let record = Record::new(class, schema, data, loaded);
        if cache {
            return Ok(self.cache().remember(record));
        }
        Ok(record)
    }

    /// A new record of `class` that is not in the database yet.
    ///
    /// # Errors
    ///
    /// [`OrmError::UndefinedRecord`] when `class` is not declared.
    pub fn make(&self, class: &str) -> Result<Record> {
        Ok(Record::new(class, self.schema(class)?, Row::new(), false))
    }

    pub(crate) fn cached(&self, class: &str, key: &SqlValue) -> Option<Record> {
        self.cache().get(class, key).cloned()
    }

    /// Entities currently cached.
    #[must_use]
    pub fn cached_entities(&self) -> usize {
        self.cache().len()
    }

    /// Turns the entity cache on or off.
    pub fn set_entity_cache(&self, enabled: bool) {
        self.cache().set_enabled(enabled);
    }

    /// Selector over the records of `class`.
    ///
    /// # Errors
    ///
    /// [`OrmError::UndefinedRecord`] when `class` is not declared.
    pub fn selector(&self, class: &str) -> Result<Selector<'_, D>> {
        Selector::new(self, class)
    }

    /// Runtime object of a normalized relation.
    ///
    /// # Errors
    ///
    /// [`OrmError::RelationResolution`] for unregistered types.
    pub fn relation(&self, relation: &NormalizedRelation) -> Result<Box<dyn Relation>> {
        self.registry.relation(relation)
    }

    /// Loader of `relation` declared by `class`.
    ///
    /// # Errors
    ///
    /// [`OrmError::UndefinedRecord`] and
    /// [`OrmError::RelationResolution`].
    pub fn loader(&self, class: &str, relation: &NormalizedRelation) -> Result<Box<dyn Loader>> {
        let schema = self.schema(class)?;
        self.registry.loader(&schema, relation)
    }

    fn named_relation(&self, class: &str, name: &str) -> Result<Box<dyn Relation>> {
        let schema = self.schema(class)?;
        let relation = schema
            .relation(name)
            .ok_or_else(|| OrmError::UndefinedRelation {
                record: class.to_string(),
                relation: name.to_string(),
            })?;
        self.relation(relation)
    }

    /// Records related to `record` through `name`, loaded on first access
    /// and attached to the record.
    ///
    /// # Errors
    ///
    /// [`OrmError::UndefinedRelation`] and DBAL errors.
    pub async fn related(&self, record: &mut Record, name: &str) -> Result<Related> {
        if let Some(related) = record.relation(name) {
            return Ok(related.clone());
        }
        let relation = self.named_relation(record.class(), name)?;
        let mut records = Vec::new();
        if let Some(query) = relation.selector(record)? {
            let target = relation.target(record)?;
            let database = self.database(self.schema(&target)?.database.as_deref())?;
            for row in database.fetch_all(&query).await? {
                records.push(self.record(&target, row, true)?);
            }
        }
        let related = if relation.is_many() {
            Related::Many(records)
        } else {
            Related::One(records.into_iter().next().map(Box::new))
        };
        record.set_relation(name, related.clone());
        Ok(related)
    }

    /// Points `parent` and `related` at each other through relation
    /// `name`. Returns whether a key changed.
    ///
    /// # Errors
    ///
    /// [`OrmError::UndefinedRelation`].
    pub fn mount(&self, parent: &mut Record, name: &str, related: &mut Record) -> Result<bool> {
        Ok(self.named_relation(parent.class(), name)?.mount(parent, related))
    }

    /// Inserts the pivot row linking `parent` and `related` through
    /// relation `name`, with extra pivot columns from `pivot`.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] when the relation has no pivot table or
    /// either key is unset, and DBAL errors.
    pub async fn link(
        &self,
        parent: &Record,
        name: &str,
        related: &Record,
        pivot: &[(String, SqlValue)],
    ) -> Result<()> {
        let relation = self.named_relation(parent.class(), name)?;
        let insert = relation.link(parent, related, pivot).ok_or_else(|| {
            OrmError::Configuration(format!(
                "relation \"{name}\" of \"{}\" cannot link these records",
                parent.class()
            ))
        })?;
        let database = self.database(parent.schema().database.as_deref())?;
        database.run(&insert).await?;
        Ok(())
    }

    /// Inserts a new record or updates the changed fields of a loaded one.
    /// Inserting sets the generated primary key.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] when a loaded record has no primary key,
    /// and DBAL errors.
    pub async fn save(&self, record: &mut Record) -> Result<()> {
        let schema = self.schema(record.class())?;
        let database = self.database(schema.database.as_deref())?;

        if record.is_loaded() {
            if !record.is_dirty() {
                return Ok(());
            }
            let (column, key) = Self::key_of(&schema, record)?;
            let mut update = UpdateQuery::table(&schema.table);
            for name in record.updates() {
                if name != column && schema.columns.contains_key(name) {
                    update = update.set(name, record.raw_field(name).cloned());
                }
            }
            database.run(&update.where_eq(column, key)).await?;
            debug!(record = %record.class(), "Updated record");
        } else {
            let mut insert = InsertQuery::new(&schema.table).values(Vec::new());
            for (name, value) in record.fields() {
                let unset = value.is_null() && !record.updates().contains(name);
                if !unset && schema.columns.contains_key(name) {
                    insert = insert.set(name, value);
                }
            }
            let outcome = database.run(&insert).await?;
            if let (Some(column), Some(id)) = (&schema.primary_key, outcome.last_insert_id) {
                if record.primary_key().is_none() {
                    record.set_field(column, id, false);
                }
            }
            debug!(record = %record.class(), "Inserted record");
        }

        record.mark_loaded();
        let mut cache = self.cache();
        if cache.is_enabled() {
            cache.remember(record.clone());
        }
        Ok(())
    }

    /// Deletes a loaded record. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] when the record has no primary key, and
    /// DBAL errors.
    pub async fn delete(&self, record: &Record) -> Result<bool> {
        if !record.is_loaded() {
            return Ok(false);
        }
        let schema = self.schema(record.class())?;
        let (column, key) = Self::key_of(&schema, record)?;
        let database = self.database(schema.database.as_deref())?;
        let outcome = database
            .run(&DeleteQuery::from(&schema.table).where_eq(column, key))
            .await?;
        self.cache().forget(record.class(), key);
        debug!(record = %record.class(), rows = outcome.rows_affected, "Deleted record");
        Ok(outcome.rows_affected > 0)
    }

    fn key_of<'r>(schema: &'r RecordSchema, record: &'r Record) -> Result<(&'r str, &'r SqlValue)> {
        let column = schema.primary_key.as_deref();
        match (column, record.primary_key()) {
            (Some(column), Some(key)) => Ok((column, key)),
            _ => Err(OrmError::Configuration(format!(
                "record \"{}\" has no primary key value",
                record.class()
            ))),
        }
    }

    /// Eager loads the relation path `path` onto `records` of `class`.
    ///
    /// Each segment runs one query for all records: parent keys are
    /// collected, related rows fetched with the loader's `IN` query and
    /// matched back by the loader's reference column.
    pub(crate) fn load<'a>(
        &'a self,
        class: &'a str,
        records: &'a mut [Record],
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + 'a>> {
        Box::pin(async move {
            let (name, rest) = match path.split_once('.') {
                Some((name, rest)) => (name, Some(rest)),
                None => (path, None),
            };
            let schema = self.schema(class)?;
            let relation = schema.relation(name).ok_or_else(|| OrmError::UndefinedRelation {
                record: class.to_string(),
                relation: name.to_string(),
            })?;
            let loader = self.registry.loader(&schema, relation)?;
            let target = relation.definition.target.clone();

            let mut keys: Vec<SqlValue> = Vec::new();
            for record in records.iter() {
                let key = record.field(loader.parent_key());
                if !key.is_null() && !keys.iter().any(|k| k.loosely_equals(&key)) {
                    keys.push(key);
                }
            }

            let mut related = Vec::new();
            if !keys.is_empty() {
                let database = self.database(self.schema(&target)?.database.as_deref())?;
                for row in database.fetch_all(&loader.post_load(&keys)).await? {
                    related.push(self.record(&target, row, true)?);
                }
            }
            debug!(record = %class, relation = %name, parents = keys.len(), loaded = related.len(), "Eager loaded relation");
            if let Some(rest) = rest {
                self.load(&target, &mut related, rest).await?;
            }

            let reference = loader.reference();
            for record in records.iter_mut() {
                let key = record.field(loader.parent_key());
                let mut matched = related
                    .iter()
                    .filter(|candidate| {
                        !key.is_null()
                            && reference_value(candidate, &reference)
                                .is_some_and(|value| value.loosely_equals(&key))
                    })
                    .cloned();
                let value = if loader.is_many() {
                    Related::Many(matched.collect())
                } else {
                    Related::One(matched.next().map(Box::new))
                };
                record.set_relation(name, value);
            }
            Ok(())
        })
    }
}

/// Value of a loader reference on a loaded record; `@pivot.` names read
/// pivot columns.
fn reference_value<'r>(record: &'r Record, reference: &str) -> Option<&'r SqlValue> {
    match reference
        .strip_prefix(crate::schema::PIVOT_DATA)
        .and_then(|rest| rest.strip_prefix('.'))
    {
        Some(column) => record.pivot().get(column),
        None => record.raw_field(reference),
    }
}
