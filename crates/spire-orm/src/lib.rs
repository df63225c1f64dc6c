//! # spire-orm
//!
//! Records, relations and eager loading on top of `spire-dbal`.
//!
//! This crate provides:
//! - [`RecordDeclaration`] to declare a record class, its table and its
//!   relations
//! - [`SchemaBuilder`] turning declarations into table schemas and the
//!   normalized schema
//! - [`Memory`] stores keeping the normalized schema between runs
//! - [`RelationRegistry`] mapping relation types to their schema, runtime
//!   and loader factories
//! - [`Orm`], [`Selector`] and [`Record`] for reading and writing rows
//!
//! ## Quick Start
//!
//! ```ignore
//! use spire_dbal::{DatabaseManager, DatabasesConfig, Filter};
//! use spire_orm::{FileMemory, Orm, OrmConfig, RecordDeclaration};
//! use spire_sqlite::SqliteDriver;
//!
//! async fn example() -> spire_orm::Result<()> {
//!     let mut user = RecordDeclaration::new("User");
//!     user.primary("id");
//!     user.string("name", 64);
//!
//!     let mut post = RecordDeclaration::new("Post");
//!     post.primary("id");
//!     post.string("title", 255);
//!     post.belongs_to("author", "User");
//!
//!     let config = DatabasesConfig::default().database("default", "sqlite://app.db", "");
//!     let databases = DatabaseManager::connect(config, |url| async move {
//!         SqliteDriver::connect(&url).await
//!     })
//!     .await?;
//!
//!     let mut orm = Orm::new(OrmConfig::default(), databases, FileMemory::new("cache"), [user, post])?;
//!     orm.update_schema(true).await?;
//!
//!     let posts = orm
//!         .selector("Post")?
//!         .where_eq("post.title", "Hello")
//!         .load("author")?
//!         .fetch_all()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Normalized Schema
//!
//! Each record class is stored as a fixed-position array (see the `M_*`
//! constants in [`schema`]) and each relation as `[type, table,
//! definition, database]`. The saved schema carries a fingerprint of the
//! declarations and is rebuilt when they change.

pub mod cache;
pub mod config;
pub mod error;
pub mod memory;
pub mod orm;
pub mod record;
pub mod relations;
pub mod schema;
pub mod selector;

pub use cache::EntityCache;
pub use config::OrmConfig;
pub use error::{OrmError, Result};
pub use memory::{FileMemory, Memory, RuntimeMemory};
pub use orm::Orm;
pub use record::{Record, Related};
pub use relations::{Loader, Relation, RelationFactory, RelationRegistry};
pub use schema::{
    NormalizedRelation, NormalizedSchema, RecordDeclaration, RecordSchema, RelationDeclaration,
    SchemaBuilder,
};
pub use selector::Selector;
