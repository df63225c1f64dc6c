//! # spire-dbal
//!
//! Database abstraction layer: identifier quoting, SQL dialects, a
//! declarative schema model with a diffing synchronizer, and parameterized
//! query builders.
//!
//! This crate provides:
//! - [`Quoter`] for prefixing and quoting table and column identifiers
//! - [`Dialect`] implementations for SQLite, PostgreSQL and MySQL
//! - [`SchemaBuilder`] to declare tables and bring a live database in line
//! - [`SelectQuery`], [`InsertQuery`], [`UpdateQuery`] and [`DeleteQuery`]
//! - the async [`Driver`] boundary and the [`Database`] / [`Table`] facades
//!
//! ## Quick Start
//!
//! ```ignore
//! use spire_dbal::{Database, Filter};
//!
//! async fn example<D: spire_dbal::Driver>(db: &Database<D>) -> spire_dbal::Result<()> {
//!     let mut schema = db.schema_builder();
//!     let posts = schema.table("posts");
//!     posts.primary("id");
//!     posts.integer("author_id");
//!     posts.string("title", 255);
//!
//!     schema.introspect(db).await?;
//!     schema.synchronize(db).await?;
//!
//!     let rows = db
//!         .fetch_all(&db.select("posts").where_eq("author_id", 1).limit(10))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Predicate Grouping
//!
//! Predicates fold left: `where_(a).where_(b).or_where(c)` compiles to
//! `(a AND b) OR c`, and parameters are bound in the order their
//! placeholders appear.

pub mod config;
pub mod database;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod manager;
pub mod query;
pub mod quoter;
pub mod schema;
pub mod value;

pub use config::{DatabaseConfig, DatabasesConfig};
pub use database::{Database, Table};
pub use dialect::{Dialect, MySqlDialect, PostgresDialect, SqliteDialect};
pub use driver::{Driver, ExecOutcome, QueryResult, Row};
pub use error::{DbalError, Result};
pub use manager::DatabaseManager;
pub use query::{
    Aggregate, CompiledQuery, Compiler, Connector, DeleteQuery, Direction, Filter, InsertQuery,
    JoinKind, Operand, Predicate, SelectQuery, Statement, UpdateQuery, WhereTree,
};
pub use quoter::Quoter;
pub use schema::{
    AbstractType, Column, DefaultValue, ForeignKey, ForeignKeyAction, Index, SchemaBuilder,
    SyncPlan, SyncReport, TableDiff, TableSchema, TableState,
};
pub use value::{SqlValue, ToSqlValue};
