//! Record queries with relation joins and eager loading.

use std::sync::Arc;

use spire_dbal::{Aggregate, Direction, Driver, Filter, SelectQuery, ToSqlValue, WhereTree};
use tracing::debug;

use crate::error::{OrmError, Result};
use crate::orm::Orm;
use crate::record::Record;
use crate::schema::RecordSchema;

/// SELECT over the table of one record class.
///
/// The table is aliased by the class role, so filters read
/// `post.title`. Relations joined with [`with`](Self::with) are aliased by
/// their relation name. Relations named in [`load`](Self::load) are fetched
/// with one extra query each after the records and attached to them;
/// `comments.author` loads `author` on every loaded comment.
pub struct Selector<'o, D: Driver> {
    orm: &'o Orm<D>,
    class: String,
    schema: Arc<RecordSchema>,
    query: SelectQuery,
    load: Vec<String>,
}

impl<'o, D: Driver> Selector<'o, D> {
    /// Selects every record of `class`.
    ///
    /// # Errors
    ///
    /// [`OrmError::UndefinedRecord`] when `class` has no schema.
    pub fn new(orm: &'o Orm<D>, class: &str) -> Result<Self> {
        let schema = orm.schema(class)?;
        let query = SelectQuery::from(&format!("{} AS {}", schema.table, schema.role))
            .columns(&[format!("{}.*", schema.role)]);
        Ok(Self {
            orm,
            class: class.to_string(),
            schema,
            query,
            load: Vec::new(),
        })
    }

    /// Record class.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The underlying query.
    #[must_use]
    pub const fn query(&self) -> &SelectQuery {
        &self.query
    }

    /// Joins relation `name` so its columns can be filtered on. The query
    /// becomes DISTINCT since has-many joins repeat parents.
    ///
    /// # Errors
    ///
    /// [`OrmError::UndefinedRelation`] for unknown names and
    /// [`OrmError::RelationResolution`] for relations without a loader.
    pub fn with(mut self, name: &str) -> Result<Self> {
        let relation = self.schema.relation(name).ok_or_else(|| OrmError::UndefinedRelation {
            record: self.class.clone(),
            relation: name.to_string(),
        })?;
        let loader = self.orm.loader(&self.class, relation)?;
        self.query = loader.join(self.query, &self.schema.role, name).distinct();
        Ok(self)
    }

    /// Eager loads relation `name`, a dotted path for nested relations.
    ///
    /// # Errors
    ///
    /// [`OrmError::UndefinedRelation`] when the first segment is unknown.
    /// Nested segments are checked when the records are fetched.
    pub fn load(mut self, name: &str) -> Result<Self> {
        let first = name.split('.').next().unwrap_or(name);
        if self.schema.relation(first).is_none() {
            return Err(OrmError::UndefinedRelation {
                record: self.class.clone(),
                relation: first.to_string(),
            });
        }
        self.load.push(name.to_string());
        Ok(self)
    }

    /// Orders by `column`.
    #[must_use]
    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.query = self.query.order_by(column, direction);
        self
    }

    /// At most `limit` records.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    /// Skips `offset` records.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.query = self.query.offset(offset);
        self
    }

    /// One-based page of `per_page` records.
    #[must_use]
    pub fn paginate(mut self, page: u64, per_page: u64) -> Self {
        self.query = self.query.paginate(page, per_page);
        self
    }

    /// Number of matching records.
    ///
    /// # Errors
    ///
    /// DBAL errors.
    pub async fn count(&self) -> Result<i64> {
        let database = self.orm.database(self.schema.database.as_deref())?;
        let value = database.aggregate(&self.query, Aggregate::Count, "*").await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    /// Matching records with their eager loaded relations.
    ///
    /// # Errors
    ///
    /// DBAL errors and unknown nested relations.
    pub async fn fetch_all(&self) -> Result<Vec<Record>> {
        self.fetch(&self.query).await
    }

    /// First matching record.
    ///
    /// # Errors
    ///
    /// See [`fetch_all`](Self::fetch_all).
    pub async fn fetch_one(&self) -> Result<Option<Record>> {
        let query = self.query.clone().limit(1);
        Ok(self.fetch(&query).await?.into_iter().next())
    }

    /// Record with primary key `key`. An unfiltered selector without joins
    /// or eager loads answers from the entity cache when it holds the
    /// record.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] when the class has no primary key, and
    /// DBAL errors.
    pub async fn find_by_pk(&self, key: impl ToSqlValue) -> Result<Option<Record>> {
        let key = key.to_sql_value();
        let primary_key = self.schema.primary_key.as_deref().ok_or_else(|| {
            OrmError::Configuration(format!("record \"{}\" has no primary key", self.class))
        })?;
        let mut plain = self.query.clone();
        if self.load.is_empty() && plain.where_tree().is_empty() && plain.joins().is_empty() {
            if let Some(record) = self.orm.cached(&self.class, &key) {
                debug!(record = %self.class, key = %key.to_sql_inline(), "Entity cache hit");
                return Ok(Some(record));
            }
        }
        let query = self
            .query
            .clone()
            .where_eq(&format!("{}.{primary_key}", self.schema.role), key)
            .limit(1);
        Ok(self.fetch(&query).await?.into_iter().next())
    }

    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Record>> {
        let database = self.orm.database(self.schema.database.as_deref())?;
        let rows = database.fetch_all(query).await?;
        let mut records = rows
            .into_iter()
            .map(|row| self.orm.record(&self.class, row, true))
            .collect::<Result<Vec<_>>>()?;
        for path in &self.load {
            self.orm.load(&self.class, &mut records, path).await?;
        }
        Ok(records)
    }
}

impl<D: Driver> Filter for Selector<'_, D> {
    fn where_tree(&mut self) -> &mut WhereTree {
        self.query.where_tree()
    }
}
