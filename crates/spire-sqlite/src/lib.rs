//! # spire-sqlite
//!
//! SQLite [`Driver`](spire_dbal::Driver) for `spire-dbal`, built on `sqlx`.
//!
//! Besides running statements, the driver reads the live schema of a table
//! (`PRAGMA table_info`, `index_list`, `foreign_key_list`) so the schema
//! synchronizer can diff it against declarations.
//!
//! ```ignore
//! use spire_dbal::Database;
//! use spire_sqlite::SqliteDriver;
//!
//! let driver = SqliteDriver::connect("sqlite::memory:").await?;
//! let db = Database::new("default", "", driver);
//! ```

mod driver;
mod introspect;

pub use driver::SqliteDriver;
