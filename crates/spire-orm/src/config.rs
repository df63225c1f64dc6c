//! ORM configuration.

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, Result};

/// Memory section holding the normalized schema.
pub const DEFAULT_SCHEMA_KEY: &str = "orm.schema";

/// ORM settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    /// Memory section the normalized schema is saved under.
    pub schema_key: String,
    /// Whether records with a primary key go through the entity cache.
    pub entity_cache: bool,
    /// Entities kept before the oldest are evicted.
    pub cache_capacity: usize,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            schema_key: String::from(DEFAULT_SCHEMA_KEY),
            entity_cache: true,
            cache_capacity: 1024,
        }
    }
}

impl OrmConfig {
    /// Parses a JSON document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// [`OrmError::Configuration`] when the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| OrmError::Configuration(e.to_string()))
    }

    /// Disables the entity cache.
    #[must_use]
    pub const fn without_cache(mut self) -> Self {
        self.entity_cache = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let config = OrmConfig::from_json(r#"{"entity_cache": false}"#).unwrap();
        assert_eq!(config.schema_key, "orm.schema");
        assert!(!config.entity_cache);
        assert_eq!(config.cache_capacity, 1024);
    }

    #[test]
    fn malformed_json_is_a_configuration_error() {
        let err = OrmConfig::from_json("{").unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
    }
}
