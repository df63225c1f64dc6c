#![allow(dead_code)]

use spire_dbal::{DatabaseManager, DatabasesConfig, Row, SqlValue};
use spire_orm::{Orm, OrmConfig, RecordDeclaration, RuntimeMemory};
use spire_sqlite::SqliteDriver;

pub fn declarations() -> Vec<RecordDeclaration> {
    let mut user = RecordDeclaration::new("User");
    user.primary("id");
    user.string("name", 64);
    user.string("email", 120).nullable();
    user.hidden(&["email"]);
    user.has_many("posts", "Post");

    let mut post = RecordDeclaration::new("Post");
    post.primary("id");
    post.string("title", 255);
    post.belongs_to("author", "User");
    post.has_many("comments", "Comment");
    post.many_to_many("tags", "Tag")
        .pivot_column("position", spire_dbal::AbstractType::Integer);

    let mut comment = RecordDeclaration::new("Comment");
    comment.primary("id");
    comment.text("body");

    let mut tag = RecordDeclaration::new("Tag");
    tag.primary("id");
    tag.string("name", 32);

    vec![user, post, comment, tag]
}

/// ORM over one in-memory SQLite database with synchronized tables.
pub async fn orm() -> Orm<SqliteDriver> {
    let config = DatabasesConfig::default().database("default", "sqlite::memory:", "");
    let mut databases = DatabaseManager::new(config);
    let driver = SqliteDriver::connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");
    databases.add("default", driver).expect("configured database");

    let mut orm = Orm::new(OrmConfig::default(), databases, RuntimeMemory::new(), declarations())
        .expect("schema");
    orm.update_schema(true).await.expect("synchronized schema");
    orm
}

pub fn row<const N: usize>(fields: [(&str, SqlValue); N]) -> Row {
    fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

pub fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}
