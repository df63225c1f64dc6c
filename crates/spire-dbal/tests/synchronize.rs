mod common;

use common::database;
use spire_dbal::{
    AbstractType, Column, DbalError, Dialect, ForeignKeyAction, Index, PostgresDialect,
    SchemaBuilder, SqliteDialect, TableSchema, TableState,
};

fn declare_posts(builder: &mut SchemaBuilder) {
    let posts = builder.table("posts");
    posts.primary("id");
    posts.integer("author_id").nullable();
    posts.string("title", 255);
    posts.index(&["author_id"]);
}

/// What a database would report after running the plan for `table`.
fn stored(dialect: &dyn Dialect, table: &TableSchema) -> TableState {
    let mut state = table.desired().resolved(dialect.identifier_limit());
    for column in state.columns.values_mut() {
        *column = dialect.normalize_column(column);
    }
    state
}

#[tokio::test]
async fn synchronize_creates_then_does_nothing() {
    let db = database(SqliteDialect::new(), "blog_");
    let mut builder = db.schema_builder();
    declare_posts(&mut builder);

    builder.introspect(&db).await.unwrap();
    let report = builder.synchronize(&db).await.unwrap();
    assert_eq!(report.created, vec!["posts"]);
    assert_eq!(
        db.driver().statements(),
        vec![
            "BEGIN",
            "CREATE TABLE \"blog_posts\" (\n    \"id\" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,\n    \"author_id\" INTEGER,\n    \"title\" VARCHAR(255) NOT NULL\n)",
            "CREATE INDEX \"blog_posts_index_author_id_index\" ON \"blog_posts\" (\"author_id\")",
            "COMMIT",
        ]
    );

    let state = stored(db.dialect(), builder.get("posts").unwrap());
    db.driver().set_table(state);
    db.driver().clear();

    let mut again = db.schema_builder();
    declare_posts(&mut again);
    again.introspect(&db).await.unwrap();
    let report = again.synchronize(&db).await.unwrap();
    assert!(report.statements.is_empty());
    assert!(db.driver().statements().is_empty());
}

#[tokio::test]
async fn passive_table_change_runs_no_ddl() {
    let db = database(PostgresDialect::new(), "");
    let mut legacy = TableState::new("legacy");
    legacy
        .columns
        .insert(String::from("id"), Column::new("id", AbstractType::Primary));
    legacy.primary_keys.push(String::from("id"));
    db.driver().set_table(legacy);

    let mut builder = db.schema_builder();
    declare_posts(&mut builder);
    {
        let table = builder.table("legacy");
        table.passive(true);
        table.primary("id");
        table.text("notes");
    }
    builder.introspect(&db).await.unwrap();

    let err = builder.synchronize(&db).await.unwrap_err();
    match err {
        DbalError::ForbiddenSchemaChange { table, columns, .. } => {
            assert_eq!(table, "legacy");
            assert_eq!(columns, vec!["notes"]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(db.driver().statements().is_empty());
}

#[tokio::test]
async fn unchanged_passive_table_is_fine() {
    let db = database(PostgresDialect::new(), "");
    let mut builder = db.schema_builder();
    {
        let table = builder.table("legacy");
        table.primary("id");
        table.text("notes");
    }
    let state = stored(db.dialect(), builder.get("legacy").unwrap());
    db.driver().set_table(state);
    builder.table("legacy").passive(true);

    builder.introspect(&db).await.unwrap();
    assert!(builder.plan(db.dialect()).unwrap().is_empty());
}

#[tokio::test]
async fn existing_table_gets_new_column_and_foreign_key() {
    let db = database(PostgresDialect::new(), "");
    let mut builder = db.schema_builder();
    {
        let users = builder.table("users");
        users.primary("id");
    }
    declare_posts(&mut builder);
    let users = stored(db.dialect(), builder.get("users").unwrap());
    let posts = stored(db.dialect(), builder.get("posts").unwrap());
    db.driver().set_table(users);
    db.driver().set_table(posts);

    let mut builder = db.schema_builder();
    builder.table("users").primary("id");
    declare_posts(&mut builder);
    {
        let posts = builder.table("posts");
        posts.boolean("published").nullable();
        posts
            .foreign_key("author_id", "users", "id")
            .on_delete(ForeignKeyAction::Cascade);
    }
    builder.introspect(&db).await.unwrap();
    let report = builder.synchronize(&db).await.unwrap();

    assert_eq!(report.altered, vec!["posts"]);
    assert_eq!(
        db.driver().statements(),
        vec![
            "BEGIN",
            "ALTER TABLE \"posts\" ADD COLUMN \"published\" BOOLEAN",
            "ALTER TABLE \"posts\" ADD CONSTRAINT \"posts_foreign_author_id\" FOREIGN KEY (\"author_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE ON UPDATE NO ACTION",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn failing_statement_stops_the_run() {
    let db = database(SqliteDialect::new(), "");
    let mut builder = db.schema_builder();
    builder.table("alpha").primary("id");
    builder.table("beta").primary("id");
    db.driver().fail_on("\"beta\"");

    builder.introspect(&db).await.unwrap();
    let err = builder.synchronize(&db).await.unwrap_err();
    assert!(matches!(err, DbalError::Driver { .. }));
    let statements = db.driver().statements();
    assert_eq!(statements.len(), 5);
    assert!(statements[1].starts_with("CREATE TABLE \"alpha\""));
    assert_eq!(
        [&statements[0], &statements[2], &statements[3], &statements[4]],
        ["BEGIN", "COMMIT", "BEGIN", "ROLLBACK"]
    );
}

#[tokio::test]
async fn failing_statement_rolls_back_its_table() {
    let db = database(PostgresDialect::new(), "");
    let mut builder = db.schema_builder();
    declare_posts(&mut builder);
    db.driver()
        .set_table(stored(db.dialect(), builder.get("posts").unwrap()));

    let mut builder = db.schema_builder();
    declare_posts(&mut builder);
    {
        let posts = builder.table("posts");
        posts.string("slug", 64).nullable();
        posts.unique(&["slug"]);
    }
    db.driver().fail_on("UNIQUE INDEX");

    builder.introspect(&db).await.unwrap();
    let err = builder.synchronize(&db).await.unwrap_err();
    assert!(matches!(err, DbalError::Driver { .. }));
    assert_eq!(
        db.driver().statements(),
        vec![
            "BEGIN",
            "ALTER TABLE \"posts\" ADD COLUMN \"slug\" CHARACTER VARYING(64)",
            "ROLLBACK",
        ]
    );
}

#[tokio::test]
async fn open_transaction_gets_a_savepoint_per_table() {
    let db = database(PostgresDialect::new(), "");
    let mut builder = db.schema_builder();
    builder.table("tags").primary("id");

    db.begin().await.unwrap();
    builder.introspect(&db).await.unwrap();
    builder.synchronize(&db).await.unwrap();
    db.commit().await.unwrap();

    let statements = db.driver().statements();
    assert_eq!(statements[0], "BEGIN");
    assert_eq!(statements[1], "SAVEPOINT \"SVP2\"");
    assert!(statements[2].starts_with("CREATE TABLE \"tags\""));
    assert_eq!(statements[3], "RELEASE SAVEPOINT \"SVP2\"");
    assert_eq!(statements[4], "COMMIT");
}

#[test]
fn index_names_differ_by_uniqueness() {
    let mut plain = Index::new(&["email"]);
    let mut unique = Index::new(&["email"]);
    unique.unique(true);
    plain.unique(false);
    assert_ne!(plain.name_for("users", 64), unique.name_for("users", 64));
}
