//! Table diff: what separates the current state from the desired one.

use std::collections::BTreeSet;

use super::{Column, ForeignKey, Index, TableState};

/// Per-element-kind differences between two [`TableState`]s, matched on
/// names. Index and foreign key entries always carry resolved names.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableDiff {
    /// Table name without prefix.
    pub table: String,
    /// Columns to add.
    pub added_columns: Vec<Column>,
    /// Columns to alter, as `(current, desired)`.
    pub altered_columns: Vec<(Column, Column)>,
    /// Columns to drop.
    pub dropped_columns: Vec<Column>,
    /// Indexes to create.
    pub added_indexes: Vec<Index>,
    /// Indexes to recreate, as `(current, desired)`.
    pub altered_indexes: Vec<(Index, Index)>,
    /// Indexes to drop.
    pub dropped_indexes: Vec<Index>,
    /// Foreign keys to add.
    pub added_foreign_keys: Vec<ForeignKey>,
    /// Foreign keys to recreate, as `(current, desired)`.
    pub altered_foreign_keys: Vec<(ForeignKey, ForeignKey)>,
    /// Foreign keys to drop.
    pub dropped_foreign_keys: Vec<ForeignKey>,
    /// Primary key columns differ.
    pub primary_keys_changed: bool,
}

impl TableDiff {
    /// Compares `current` against `desired`.
    #[must_use]
    pub fn compute(table: &str, current: &TableState, desired: &TableState, limit: usize) -> Self {
        let current = current.resolved(limit);
        let desired = desired.resolved(limit);
        let mut diff = Self {
            table: table.to_string(),
            ..Self::default()
        };

        let current_names: BTreeSet<&str> = current.columns.keys().map(String::as_str).collect();
        let desired_names: BTreeSet<&str> = desired.columns.keys().map(String::as_str).collect();

        for (name, column) in &desired.columns {
            match current.columns.get(name) {
                None => diff.added_columns.push(column.clone()),
                Some(existing) if !existing.compare(column) => {
                    diff.altered_columns.push((existing.clone(), column.clone()));
                }
                Some(_) => {}
            }
        }
        for name in current_names.difference(&desired_names) {
            if let Some(column) = current.columns.get(*name) {
                diff.dropped_columns.push(column.clone());
            }
        }

        let index_name = |index: &Index| index.name.clone().unwrap_or_default();
        for index in &desired.indexes {
            match current.indexes.iter().find(|i| index_name(i) == index_name(index)) {
                None => diff.added_indexes.push(index.clone()),
                Some(existing) if !existing.compare(index) => {
                    diff.altered_indexes.push((existing.clone(), index.clone()));
                }
                Some(_) => {}
            }
        }
        for index in &current.indexes {
            if !desired.indexes.iter().any(|i| index_name(i) == index_name(index)) {
                diff.dropped_indexes.push(index.clone());
            }
        }

        let fk_name = |fk: &ForeignKey| fk.name.clone().unwrap_or_default();
        for fk in &desired.foreign_keys {
            match current.foreign_keys.iter().find(|f| fk_name(f) == fk_name(fk)) {
                None => diff.added_foreign_keys.push(fk.clone()),
                Some(existing) if !existing.compare(fk) => {
                    diff.altered_foreign_keys.push((existing.clone(), fk.clone()));
                }
                Some(_) => {}
            }
        }
        for fk in &current.foreign_keys {
            if !desired.foreign_keys.iter().any(|f| fk_name(f) == fk_name(fk)) {
                diff.dropped_foreign_keys.push(fk.clone());
            }
        }

        let current_pk: BTreeSet<&String> = current.primary_keys.iter().collect();
        let desired_pk: BTreeSet<&String> = desired.primary_keys.iter().collect();
        diff.primary_keys_changed = current_pk != desired_pk;

        diff
    }

    /// No changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.altered_columns.is_empty()
            && self.dropped_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.altered_indexes.is_empty()
            && self.dropped_indexes.is_empty()
            && self.added_foreign_keys.is_empty()
            && self.altered_foreign_keys.is_empty()
            && self.dropped_foreign_keys.is_empty()
            && !self.primary_keys_changed
    }

    /// Names of every added, altered or dropped column.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.added_columns
            .iter()
            .chain(self.altered_columns.iter().map(|(_, c)| c))
            .chain(self.dropped_columns.iter())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Names of every added, altered or dropped index.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.added_indexes
            .iter()
            .chain(self.altered_indexes.iter().map(|(_, i)| i))
            .chain(self.dropped_indexes.iter())
            .filter_map(|i| i.name.clone())
            .collect()
    }

    /// Names of every added, altered or dropped foreign key.
    #[must_use]
    pub fn foreign_key_names(&self) -> Vec<String> {
        self.added_foreign_keys
            .iter()
            .chain(self.altered_foreign_keys.iter().map(|(_, f)| f))
            .chain(self.dropped_foreign_keys.iter())
            .filter_map(|f| f.name.clone())
            .collect()
    }
}
