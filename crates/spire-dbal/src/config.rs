//! Database configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{DbalError, Result};

/// Connection settings of one database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Driver specific connection string, e.g. `sqlite::memory:`.
    pub connection: String,
    /// Prefix applied to every table name.
    #[serde(default)]
    pub prefix: String,
}

/// Named databases, aliases and the default database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabasesConfig {
    /// Database (or alias) used when none is named.
    pub default: String,
    /// Alias name to database or alias name.
    pub aliases: BTreeMap<String, String>,
    /// Database name to its settings.
    pub databases: BTreeMap<String, DatabaseConfig>,
}

impl Default for DatabasesConfig {
    fn default() -> Self {
        Self {
            default: String::from("default"),
            aliases: BTreeMap::new(),
            databases: BTreeMap::new(),
        }
    }
}

impl DatabasesConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// [`DbalError::Configuration`] when the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DbalError::Configuration(e.to_string()))
    }

    /// Converts a JSON value.
    ///
    /// # Errors
    ///
    /// [`DbalError::Configuration`] when the value has the wrong shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| DbalError::Configuration(e.to_string()))
    }

    /// Adds a database.
    #[must_use]
    pub fn database(
        mut self,
        name: impl Into<String>,
        connection: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        self.databases.insert(
            name.into(),
            DatabaseConfig {
                connection: connection.into(),
                prefix: prefix.into(),
            },
        );
        self
    }

    /// Adds an alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    /// Follows aliases from `name` (or the default when `None`) to a
    /// configured database name.
    ///
    /// # Errors
    ///
    /// [`DbalError::Configuration`] for cyclic aliases or unknown names.
    pub fn resolve(&self, name: Option<&str>) -> Result<String> {
        let mut current = name.unwrap_or(&self.default);
        let mut seen = BTreeSet::new();
        while let Some(target) = self.aliases.get(current) {
            if !seen.insert(current) {
                return Err(DbalError::Configuration(format!(
                    "alias cycle through \"{current}\""
                )));
            }
            current = target;
        }
        if self.databases.contains_key(current) {
            Ok(current.to_string())
        } else {
            Err(DbalError::Configuration(format!(
                "undefined database \"{current}\""
            )))
        }
    }

    /// Settings of `name` after alias resolution.
    ///
    /// # Errors
    ///
    /// See [`resolve`](Self::resolve).
    pub fn get(&self, name: Option<&str>) -> Result<&DatabaseConfig> {
        let resolved = self.resolve(name)?;
        self.databases
            .get(&resolved)
            .ok_or_else(|| DbalError::Configuration(format!("undefined database \"{resolved}\"")))
    }
}
