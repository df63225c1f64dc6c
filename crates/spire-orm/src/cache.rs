//! Identity map of records by class and primary key.

use indexmap::IndexMap;
use spire_dbal::SqlValue;

use crate::record::Record;

/// Keeps one copy of each record with a primary key so repeated loads
/// hand back the same state.
///
/// The cache is bounded: once `capacity` entries are stored the oldest one
/// is evicted.
#[derive(Debug, Clone)]
pub struct EntityCache {
    enabled: bool,
    capacity: usize,
    entities: IndexMap<(String, String), Record>,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new(true, 1024)
    }
}

impl EntityCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            capacity,
            entities: IndexMap::new(),
        }
    }

    /// Whether records go through the cache.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns the cache on or off. Turning it off drops every entry.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.entities.clear();
        }
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// No cached records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether a record of `class` with `key` is cached.
    #[must_use]
    pub fn has(&self, class: &str, key: &SqlValue) -> bool {
        self.get(class, key).is_some()
    }

    /// Cached record of `class` with `key`.
    #[must_use]
    pub fn get(&self, class: &str, key: &SqlValue) -> Option<&Record> {
        let key = cache_key(key)?;
        self.entities.get(&(class.to_string(), key))
    }

    /// Stores `record` when it has a primary key and returns it.
    pub fn remember(&mut self, record: Record) -> Record {
        if !self.enabled || self.capacity == 0 {
            return record;
        }
        let Some(key) = record.primary_key().and_then(cache_key) else {
            return record;
        };
        self.entities
            .insert((record.class().to_string(), key), record.clone());
        while self.entities.len() > self.capacity {
            self.entities.shift_remove_index(0);
        }
        record
    }

    /// Drops the record of `class` with `key`.
    pub fn forget(&mut self, class: &str, key: &SqlValue) {
        if let Some(key) = cache_key(key) {
            self.entities.shift_remove(&(class.to_string(), key));
        }
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

/// `1` and `"1"` address the same row.
fn cache_key(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        other => Some(
            other
                .as_i64()
                .map_or_else(|| other.to_sql_inline(), |n| n.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::schema::{Mutators, RecordSchema};
    use indexmap::IndexMap;
    use spire_dbal::{AbstractType, Row};

    fn record(id: i64) -> Record {
        let schema = Arc::new(RecordSchema {
            role: String::from("tag"),
            source: None,
            table: String::from("tags"),
            database: None,
            hidden: Vec::new(),
            secured: Vec::new(),
            fillable: Vec::new(),
            mutators: Mutators::default(),
            validates: IndexMap::new(),
            columns: IndexMap::from([(String::from("id"), AbstractType::Primary)]),
            nullable: Vec::new(),
            relations: IndexMap::new(),
            primary_key: Some(String::from("id")),
        });
        let mut row = Row::new();
        row.insert(String::from("id"), SqlValue::Int(id));
        Record::new("Tag", schema, row, true)
    }

    #[test]
    fn keys_compare_loosely() {
        let mut cache = EntityCache::default();
        cache.remember(record(1));
        assert!(cache.has("Tag", &SqlValue::Text(String::from("1"))));
        assert!(!cache.has("Post", &SqlValue::Int(1)));
    }

    #[test]
    fn oldest_entry_is_evicted() {
        let mut cache = EntityCache::new(true, 2);
        for id in 1..=3 {
            cache.remember(record(id));
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.has("Tag", &SqlValue::Int(1)));
        assert!(cache.has("Tag", &SqlValue::Int(3)));
    }

    #[test]
    fn disabled_cache_keeps_nothing() {
        let mut cache = EntityCache::default();
        cache.remember(record(1));
        cache.set_enabled(false);
        assert!(cache.is_empty());
        cache.remember(record(2));
        assert!(cache.is_empty());
    }

    #[test]
    fn forget_drops_one_record() {
        let mut cache = EntityCache::default();
        cache.remember(record(1));
        cache.remember(record(2));
        cache.forget("Tag", &SqlValue::Int(1));
        assert_eq!(cache.len(), 1);
    }
}
