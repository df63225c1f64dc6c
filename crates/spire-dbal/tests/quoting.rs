mod common;

use spire_dbal::{
    Dialect, Filter, MySqlDialect, PostgresDialect, Quoter, SelectQuery, SqliteDialect, Statement,
};

fn dialects() -> Vec<Box<dyn Dialect>> {
    vec![
        Box::new(SqliteDialect::new()),
        Box::new(PostgresDialect::new()),
        Box::new(MySqlDialect::new()),
    ]
}

#[test]
fn quoting_is_deterministic_across_quoters() {
    let identifiers = [
        ("users", true),
        ("users AS u", true),
        ("u.id", false),
        ("COUNT(posts.id)", false),
        ("name", false),
        ("posts.*", false),
    ];
    for dialect in dialects() {
        let mut first = Quoter::new(dialect.as_ref(), "app_");
        let mut second = Quoter::new(dialect.as_ref(), "app_");
        for (identifier, is_table) in identifiers {
            assert_eq!(
                first.quote(identifier, is_table).unwrap(),
                second.quote(identifier, is_table).unwrap(),
                "{} disagrees on {identifier}",
                dialect.name()
            );
        }
    }
}

#[test]
fn prefix_is_applied_once() {
    for dialect in dialects() {
        let mut quoter = Quoter::new(dialect.as_ref(), "app_");
        let once = quoter.quote("users", true).unwrap();
        let twice = quoter.quote("app_users", true).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, dialect.identifier("app_users"));
    }
}

#[test]
fn aliases_shadow_prefixing() {
    let dialect = PostgresDialect::new();
    let query = SelectQuery::from("users AS u")
        .columns(&["u.id", "posts.title"])
        .inner_join("posts", |on| on.on("posts.user_id", "=", "u.id"))
        .where_eq("u.active", true);
    let compiled = query.compile(&dialect, "app_").unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT \"u\".\"id\", \"app_posts\".\"title\" FROM \"app_users\" AS \"u\" INNER JOIN \"app_posts\" ON \"app_posts\".\"user_id\" = \"u\".\"id\" WHERE \"u\".\"active\" = $1"
    );
}

#[test]
fn compiling_twice_gives_identical_sql() {
    let query = SelectQuery::from("users AS u")
        .where_eq("u.id", 1)
        .or_where_group(|g| g.and("u.name", "LIKE", "a%").and("u.age", ">", 3));
    let dialect = SqliteDialect::new();
    assert_eq!(
        query.compile(&dialect, "p_").unwrap(),
        query.compile(&dialect, "p_").unwrap()
    );
}
