mod common;

use common::database;
use spire_dbal::{
    DbalError, Driver, Filter, MySqlDialect, PostgresDialect, QueryResult, Row, SqlValue,
    SqliteDialect,
};

#[tokio::test]
async fn params_follow_placeholder_order() {
    let db = database(PostgresDialect::new(), "");
    let query = db
        .select("users")
        .where_eq("a", 1)
        .where_eq("b", 2)
        .or_where_eq("c", 3)
        .where_group(|g| g.and("d", "=", 4).or("e", "=", 5));
    db.fetch_all(&query).await.unwrap();

    let entries = db.driver().entries();
    assert_eq!(
        entries[0].0,
        "SELECT * FROM \"users\" WHERE ((\"a\" = $1 AND \"b\" = $2) OR \"c\" = $3) AND (\"d\" = $4 OR \"e\" = $5)"
    );
    assert_eq!(
        entries[0].1,
        (1..=5).map(SqlValue::Int).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn table_helpers_compile_with_prefix() {
    let db = database(SqliteDialect::new(), "blog_");
    let posts = db.table("posts");
    assert_eq!(posts.real_name(), "blog_posts");

    let id = posts
        .insert([("title", SqlValue::Text(String::from("hello"))), ("author_id", SqlValue::Int(7))])
        .await
        .unwrap();
    assert_eq!(id, Some(1));
    db.run(&posts.update([("title", "bye")]).where_eq("id", 1))
        .await
        .unwrap();
    db.run(&posts.delete().where_eq("id", 1)).await.unwrap();

    assert_eq!(
        db.driver().statements(),
        vec![
            "INSERT INTO \"blog_posts\" (\"title\", \"author_id\") VALUES (?, ?)",
            "UPDATE \"blog_posts\" SET \"title\" = ? WHERE \"id\" = ?",
            "DELETE FROM \"blog_posts\" WHERE \"id\" = ?",
        ]
    );
}

#[tokio::test]
async fn empty_insert_uses_defaults() {
    let db = database(MySqlDialect::new(), "");
    db.table("hits")
        .insert(Vec::<(&str, i64)>::new())
        .await
        .unwrap();
    assert_eq!(db.driver().statements(), vec!["INSERT INTO `hits` () VALUES ()"]);
}

#[tokio::test]
async fn count_reads_scalar() {
    let db = database(SqliteDialect::new(), "");
    let mut row = Row::new();
    row.insert(String::from("aggregate"), SqlValue::Int(42));
    db.driver()
        .respond(QueryResult::new(vec![String::from("aggregate")], vec![row]));

    assert_eq!(db.table("users").count().await.unwrap(), 42);
    assert_eq!(
        db.driver().statements(),
        vec!["SELECT COUNT(*) AS \"aggregate\" FROM \"users\""]
    );
}

#[tokio::test]
async fn nested_transactions_use_savepoints() {
    let db = database(SqliteDialect::new(), "");
    db.begin().await.unwrap();
    db.begin().await.unwrap();
    db.rollback().await.unwrap();
    db.begin().await.unwrap();
    db.commit().await.unwrap();
    db.commit().await.unwrap();
    assert_eq!(db.transaction_level(), 0);

    assert_eq!(
        db.driver().statements(),
        vec![
            "BEGIN",
            "SAVEPOINT \"SVP2\"",
            "ROLLBACK TO SAVEPOINT \"SVP2\"",
            "SAVEPOINT \"SVP2\"",
            "RELEASE SAVEPOINT \"SVP2\"",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn commit_without_transaction_fails() {
    let db = database(SqliteDialect::new(), "");
    assert!(matches!(db.commit().await, Err(DbalError::Transaction(_))));
    assert!(matches!(db.rollback().await, Err(DbalError::Transaction(_))));
}

#[tokio::test]
async fn transaction_callback_commits_or_rolls_back() {
    let db = database(SqliteDialect::new(), "");

    let value: Result<i32, DbalError> = db
        .transaction(|| async {
            db.execute("UPDATE t SET x = 1", &[]).await?;
            Ok(5)
        })
        .await;
    assert_eq!(value.unwrap(), 5);

    let failed: Result<(), DbalError> = db
        .transaction(|| async { Err(DbalError::Configuration(String::from("boom"))) })
        .await;
    assert!(failed.is_err());

    assert_eq!(
        db.driver().statements(),
        vec!["BEGIN", "UPDATE t SET x = 1", "COMMIT", "BEGIN", "ROLLBACK"]
    );
}

#[tokio::test]
async fn failed_rollback_keeps_the_callback_error() {
    let db = database(SqliteDialect::new(), "");
    db.driver().fail_on("ROLLBACK");

    let failed: Result<(), DbalError> = db
        .transaction(|| async { Err(DbalError::Configuration(String::from("boom"))) })
        .await;
    match failed {
        Err(DbalError::Configuration(message)) => assert_eq!(message, "boom"),
        other => panic!("expected the callback error, got {other:?}"),
    }
    assert_eq!(db.transaction_level(), 0);
}

#[tokio::test]
async fn driver_errors_carry_the_statement() {
    let db = database(SqliteDialect::new(), "");
    db.driver().fail_on("DELETE");
    let err = db
        .run(&db.delete("users").where_eq("id", 3))
        .await
        .unwrap_err();
    match err {
        DbalError::Driver { sql, params, .. } => {
            assert_eq!(sql, "DELETE FROM \"users\" WHERE \"id\" = ?");
            assert_eq!(params, vec![SqlValue::Int(3)]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn tables_are_listed_without_prefix() {
    let db = database(SqliteDialect::new(), "app_");
    db.driver().set_table(spire_dbal::TableState::new("app_users"));
    db.driver().set_table(spire_dbal::TableState::new("other"));
    let names: Vec<String> = db
        .tables()
        .await
        .unwrap()
        .iter()
        .map(|t| t.name().to_string())
        .collect();
    assert_eq!(names, vec!["users"]);
    assert!(db.has_table("users").await.unwrap());
    assert!(!db.driver().has_table("users").await.unwrap());
}
