//! Named databases.

use std::future::Future;

use indexmap::IndexMap;
use tracing::info;

use crate::config::DatabasesConfig;
use crate::database::Database;
use crate::driver::Driver;
use crate::error::{DbalError, Result};

/// Resolves database names and aliases to connected [`Database`]s.
#[derive(Debug)]
pub struct DatabaseManager<D: Driver> {
    config: DatabasesConfig,
    databases: IndexMap<String, Database<D>>,
}

impl<D: Driver> DatabaseManager<D> {
    /// Creates a manager with no connected database.
    #[must_use]
    pub fn new(config: DatabasesConfig) -> Self {
        Self {
            config,
            databases: IndexMap::new(),
        }
    }

    /// Connects every configured database through `connect`, which receives
    /// the connection string.
    ///
    /// # Errors
    ///
    /// The first error returned by `connect`.
    pub async fn connect<F, Fut>(config: DatabasesConfig, mut connect: F) -> Result<Self>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<D>>,
    {
        let mut manager = Self::new(config);
        let entries: Vec<(String, String)> = manager
            .config
            .databases
            .iter()
            .map(|(name, db)| (name.clone(), db.connection.clone()))
            .collect();
        for (name, connection) in entries {
            let driver = connect(connection).await?;
            manager.add(&name, driver)?;
        }
        Ok(manager)
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &DatabasesConfig {
        &self.config
    }

    /// Registers the driver of configured database `name`.
    ///
    /// # Errors
    ///
    /// [`DbalError::Configuration`] when `name` is not configured.
    pub fn add(&mut self, name: &str, driver: D) -> Result<&Database<D>> {
        let settings = self.config.databases.get(name).ok_or_else(|| {
            DbalError::Configuration(format!("undefined database \"{name}\""))
        })?;
        info!(database = %name, prefix = %settings.prefix, "Registering database");
        let database = Database::new(name, settings.prefix.clone(), driver);
        self.databases.insert(name.to_string(), database);
        self.database(Some(name))
    }

    /// Database `name` (or alias), the default one when `None`.
    ///
    /// # Errors
    ///
    /// [`DbalError::Configuration`] for unknown names or databases that were
    /// never connected.
    pub fn database(&self, name: Option<&str>) -> Result<&Database<D>> {
        let resolved = self.config.resolve(name)?;
        self.databases.get(&resolved).ok_or_else(|| {
            DbalError::Configuration(format!("database \"{resolved}\" is not connected"))
        })
    }

    /// Connected databases.
    pub fn databases(&self) -> impl Iterator<Item = &Database<D>> {
        self.databases.values()
    }
}
