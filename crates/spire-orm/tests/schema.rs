mod common;

use common::{declarations, orm, row, text};
use serde_json::json;
use spire_dbal::{DatabaseManager, DatabasesConfig, DbalError, SqlValue};
use spire_orm::schema::{M_COLUMNS, M_PRIMARY_KEY, M_RELATIONS, M_ROLE_NAME, M_TABLE, R_DEFINITION, R_TYPE};
use spire_orm::{
    FileMemory, Memory, Orm, OrmConfig, OrmError, RecordDeclaration, RelationRegistry, SchemaBuilder,
};
use spire_sqlite::SqliteDriver;

fn manager() -> DatabaseManager<SqliteDriver> {
    DatabaseManager::new(DatabasesConfig::default().database("default", "sqlite::memory:", ""))
}

#[test]
fn normalized_schema_uses_fixed_positions() {
    let config = DatabasesConfig::default().database("default", "sqlite::memory:", "");
    let builder = SchemaBuilder::new(declarations(), &config, &RelationRegistry::with_defaults()).unwrap();
    let value = serde_json::to_value(builder.normalize_schema()).unwrap();

    let post = &value["Post"];
    assert_eq!(post[M_ROLE_NAME], json!("post"));
    assert_eq!(post[M_TABLE], json!("posts"));
    assert_eq!(post[M_PRIMARY_KEY], json!("id"));
    assert_eq!(post[M_COLUMNS]["user_id"], json!("integer"));

    let author = &post[M_RELATIONS]["author"];
    assert_eq!(author[R_TYPE], json!("belongs_to"));
    assert_eq!(author[R_DEFINITION]["inner_key"], json!("user_id"));
    assert_eq!(post[M_RELATIONS]["tags"][R_DEFINITION]["pivot"]["table"], json!("post_tag_map"));
}

#[test]
fn file_memory_keeps_the_schema_until_declarations_change() {
    let dir = tempfile::tempdir().unwrap();
    let memory = FileMemory::new(dir.path());
    Orm::new(OrmConfig::default(), manager(), memory.clone(), declarations()).unwrap();
    let saved = memory.load_data("orm.schema").unwrap().unwrap();

    Orm::new(OrmConfig::default(), manager(), memory.clone(), declarations()).unwrap();
    assert_eq!(memory.load_data("orm.schema").unwrap().unwrap(), saved);

    let mut changed = declarations();
    changed[3].string("color", 16);
    let orm = Orm::new(OrmConfig::default(), manager(), memory.clone(), changed).unwrap();
    assert_ne!(memory.load_data("orm.schema").unwrap().unwrap()["fingerprint"], saved["fingerprint"]);
    assert!(orm.schema("Tag").unwrap().columns.contains_key("color"));
}

#[tokio::test]
async fn morphed_relations_resolve_by_role() {
    let mut image = RecordDeclaration::new("Image");
    image.primary("id");
    image.string("url", 255);
    image.belongs_to_morphed("owner", &["User", "Post"]);
    let mut user = RecordDeclaration::new("User");
    user.primary("id");
    user.string("name", 64);
    user.has_many("images", "Image").morph_key("owner_type").outer_key("owner_id");
    let mut post = RecordDeclaration::new("Post");
    post.primary("id");

    let config = DatabasesConfig::default().database("default", "sqlite::memory:", "");
    let mut databases = DatabaseManager::new(config);
    databases
        .add("default", SqliteDriver::connect("sqlite::memory:").await.unwrap())
        .unwrap();
    let mut orm =
        Orm::new(OrmConfig::default(), databases, spire_orm::RuntimeMemory::new(), [image, user, post]).unwrap();
    orm.update_schema(true).await.unwrap();

    let mut ada = orm.record("User", row([("name", text("ada"))]), false).unwrap();
    orm.save(&mut ada).await.unwrap();
    let mut avatar = orm.make("Image").unwrap();
    avatar.set_field("url", "a.png", true);
    assert!(orm.mount(&mut avatar, "owner", &mut ada).unwrap());
    assert_eq!(avatar.field("owner_type"), text("user"));
    assert!(!orm.mount(&mut avatar, "owner", &mut ada).unwrap());
    orm.save(&mut avatar).await.unwrap();

    let owner = orm.related(&mut avatar, "owner").await.unwrap();
    assert_eq!(owner.one().unwrap().class(), "User");

    let images = orm.related(&mut ada, "images").await.unwrap();
    assert_eq!(images.records().len(), 1);
    assert_eq!(images.records()[0].field("owner_id"), SqlValue::Int(1));

    let err = orm.selector("Image").unwrap().load("owner").unwrap().fetch_all().await.unwrap_err();
    assert!(matches!(err, spire_orm::OrmError::RelationResolution(_)));
}

#[tokio::test]
async fn schema_cache_is_rebuilt_without_sync() {
    let mut orm = orm().await;
    let reports = orm.update_schema(false).await.unwrap();
    assert!(reports.is_empty());
    assert_eq!(orm.classes().collect::<Vec<_>>(), vec!["User", "Post", "Comment", "Tag"]);
}

#[tokio::test]
async fn forbidden_change_in_one_database_blocks_every_database() {
    let config = DatabasesConfig::default()
        .database("default", "sqlite::memory:", "")
        .database("archive", "sqlite::memory:", "");
    let mut databases = DatabaseManager::new(config);
    for name in ["default", "archive"] {
        databases
            .add(name, SqliteDriver::connect("sqlite::memory:").await.unwrap())
            .unwrap();
    }
    databases
        .database(Some("archive"))
        .unwrap()
        .execute("CREATE TABLE entries (id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL)", &[])
        .await
        .unwrap();

    let mut tag = RecordDeclaration::new("Tag");
    tag.primary("id");
    tag.string("name", 32);
    let mut entry = RecordDeclaration::new("Entry").with_database("archive").passive();
    entry.primary("id");
    entry.text("body");

    let mut orm =
        Orm::new(OrmConfig::default(), databases, spire_orm::RuntimeMemory::new(), [tag, entry]).unwrap();
    let err = orm.update_schema(true).await.unwrap_err();
    assert!(matches!(
        err,
        OrmError::Dbal(DbalError::ForbiddenSchemaChange { ref table, .. }) if table == "entries"
    ));
    assert!(!orm.database(None).unwrap().has_table("tags").await.unwrap());
}
