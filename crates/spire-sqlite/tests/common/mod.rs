#![allow(dead_code)]

use spire_dbal::{Database, SchemaBuilder};
use spire_sqlite::SqliteDriver;

pub async fn memory(prefix: &str) -> Database<SqliteDriver> {
    let driver = SqliteDriver::connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");
    Database::new("default", prefix, driver)
}

pub fn declare_posts(builder: &mut SchemaBuilder) {
    let posts = builder.table("posts");
    posts.primary("id");
    posts.integer("author_id");
    posts.string("title", 255);
}
