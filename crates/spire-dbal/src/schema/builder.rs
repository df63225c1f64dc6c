//! Schema builder and synchronizer.
//!
//! Collects table declarations, compares them with the live database and
//! applies the difference. Planning is pure: [`SchemaBuilder::plan`] only
//! produces statements, [`SchemaBuilder::synchronize`] runs them.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::{ForeignKey, TableDiff, TableSchema, TableState};
use crate::database::Database;
use crate::dialect::Dialect;
use crate::driver::Driver;
use crate::error::{DbalError, Result};

/// Statements for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    /// Table name without prefix.
    pub table: String,
    /// Whether the table is created rather than altered.
    pub created: bool,
    /// Statements, in execution order, run in one transaction.
    pub statements: Vec<String>,
    /// Connection settings run before the transaction.
    pub before: Vec<String>,
    /// Connection settings run after the transaction, even when it fails.
    pub after: Vec<String>,
}

/// Everything a synchronization pass would execute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Per-table statements: created tables in dependency order, then
    /// altered tables.
    pub tables: Vec<TablePlan>,
    /// Foreign keys added once every table exists.
    pub deferred: Vec<String>,
}

impl SyncPlan {
    /// Nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.deferred.is_empty()
    }

    /// Every statement in execution order.
    #[must_use]
    pub fn statements(&self) -> Vec<&str> {
        self.tables
            .iter()
            .flat_map(|t| t.before.iter().chain(&t.statements).chain(&t.after))
            .chain(self.deferred.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Outcome of [`SchemaBuilder::synchronize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Created tables, without prefix.
    pub created: Vec<String>,
    /// Altered tables, without prefix.
    pub altered: Vec<String>,
    /// Executed statements.
    pub statements: Vec<String>,
}

/// Declared tables of one database.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    prefix: String,
    tables: IndexMap<String, TableSchema>,
}

impl SchemaBuilder {
    /// Creates a builder for tables with `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            tables: IndexMap::new(),
        }
    }

    /// Table prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Declared table `name`, created on first access.
    pub fn table(&mut self, name: &str) -> &mut TableSchema {
        let prefix = self.prefix.clone();
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| TableSchema::new(name, prefix))
    }

    /// Looks up a declared table.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Declared tables in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Loads the current state of every declared table.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn introspect<D: Driver>(&mut self, database: &Database<D>) -> Result<()> {
        for table in self.tables.values_mut() {
            let current = database.driver().table_state(table.real_name()).await?;
            debug!(
                table = %table.name(),
                exists = current.is_some(),
                "Introspected table"
            );
            table.set_current(current);
        }
        Ok(())
    }

    /// Desired state of `table` as the dialect will store it.
    fn normalized(dialect: &dyn Dialect, table: &TableSchema) -> TableState {
        let mut state = table.desired().resolved(dialect.identifier_limit());
        for column in state.columns.values_mut() {
            *column = dialect.normalize_column(column);
        }
        state
    }

    /// Computes the statements that bring the database to the declared
    /// schema.
    ///
    /// # Errors
    ///
    /// [`DbalError::ForbiddenSchemaChange`] when a passive table would
    /// change, [`DbalError::UnsupportedSchemaChange`] when the primary key
    /// of an existing table changes. Both are raised before any statement
    /// is produced.
    pub fn plan(&self, dialect: &dyn Dialect) -> Result<SyncPlan> {
        let limit = dialect.identifier_limit();
        let mut created: BTreeMap<String, (&TableSchema, TableState)> = BTreeMap::new();
        let mut altered: Vec<(&TableSchema, TableState, TableDiff)> = Vec::new();

        for table in self.tables.values() {
            let desired = Self::normalized(dialect, table);
            let empty = TableState::new(table.real_name());
            let current = table.current().unwrap_or(&empty);
            let diff = TableDiff::compute(table.name(), current, &desired, limit);

            if diff.is_empty() {
                debug!(table = %table.name(), "Table is up to date");
                continue;
            }
            if table.is_passive() {
                return Err(DbalError::ForbiddenSchemaChange {
                    table: table.name().to_string(),
                    columns: diff.column_names(),
                    indexes: diff.index_names(),
                    foreign_keys: diff.foreign_key_names(),
                });
            }
            if table.exists() && diff.primary_keys_changed {
                return Err(DbalError::UnsupportedSchemaChange {
                    table: table.name().to_string(),
                    reason: String::from("primary key of an existing table cannot change"),
                });
            }

            if table.exists() {
                altered.push((table, desired, diff));
            } else {
                created.insert(table.real_name().to_string(), (table, desired));
            }
        }

        let mut plan = SyncPlan::default();
        let mut available: BTreeSet<String> = self
            .tables
            .values()
            .filter(|t| t.exists())
            .map(|t| t.real_name().to_string())
            .collect();

        for name in creation_order(&created) {
            let Some((table, desired)) = created.get(&name) else {
                continue;
            };
            let mut inline: Vec<&ForeignKey> = Vec::new();
            for fk in &desired.foreign_keys {
                let ready = fk.foreign_table == desired.name
                    || available.contains(&fk.foreign_table)
                    || !created.contains_key(&fk.foreign_table);
                if ready || !dialect.supports_foreign_key_alteration() {
                    inline.push(fk);
                } else {
                    plan.deferred.push(dialect.add_foreign_key(&desired.name, fk));
                }
            }
            plan.tables.push(TablePlan {
                table: table.name().to_string(),
                created: true,
                statements: dialect.create_table(desired, &inline),
                before: Vec::new(),
                after: Vec::new(),
            });
            available.insert(name);
        }

        for (table, desired, diff) in altered {
            let Some(current) = table.current() else {
                continue;
            };
            let (before, after) = dialect.alter_table_guards(&diff);
            plan.tables.push(TablePlan {
                table: table.name().to_string(),
                created: false,
                statements: dialect.alter_table(current, &desired, &diff)?,
                before,
                after,
            });
        }

        Ok(plan)
    }

    /// Plans and executes the synchronization.
    ///
    /// # Errors
    ///
    /// Planning errors (before anything runs) or the first driver error.
    pub async fn synchronize<D: Driver>(&self, database: &Database<D>) -> Result<SyncReport> {
        let plan = self.plan(database.dialect())?;
        Self::execute(&plan, database).await
    }

    /// Executes a plan table by table. Each table's statements run in a
    /// transaction (a savepoint inside an open one), so a failing statement
    /// leaves that table untouched. The pass stops there and tables already
    /// handled stay as they are.
    ///
    /// # Errors
    ///
    /// The first driver or transaction error.
    pub async fn execute<D: Driver>(plan: &SyncPlan, database: &Database<D>) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for table in &plan.tables {
            info!(
                table = %table.table,
                created = table.created,
                statements = table.statements.len(),
                "Synchronizing table"
            );
            for sql in &table.before {
                database.execute(sql, &[]).await?;
            }
            let applied = if database.transaction_level() == 0
                || database.dialect().supports_savepoints()
            {
                database
                    .transaction(|| run_statements(database, &table.statements))
                    .await
            } else {
                run_statements(database, &table.statements).await
            };
            for sql in &table.after {
                if let Err(err) = database.execute(sql, &[]).await {
                    if applied.is_ok() {
                        return Err(err);
                    }
                    warn!(table = %table.table, error = %err, "Restoring connection settings failed");
                }
            }
            applied?;

            report.statements.extend(table.statements.iter().cloned());
            if table.created {
                report.created.push(table.table.clone());
            } else {
                report.altered.push(table.table.clone());
            }
        }
        for sql in &plan.deferred {
            database.execute(sql, &[]).await?;
            report.statements.push(sql.clone());
        }

        Ok(report)
    }
}

async fn run_statements<D: Driver>(database: &Database<D>, statements: &[String]) -> Result<()> {
    for sql in statements {
        database.execute(sql, &[]).await?;
    }
    Ok(())
}

/// Kahn's algorithm over the tables being created, smallest name first.
/// Tables left in a cycle follow in name order.
fn creation_order(created: &BTreeMap<String, (&TableSchema, TableState)>) -> Vec<String> {
    let mut pending: BTreeMap<&str, BTreeSet<&str>> = created
        .iter()
        .map(|(name, (_, state))| {
            let deps = state
                .dependencies()
                .into_iter()
                .filter(|dep| created.contains_key(*dep))
                .collect();
            (name.as_str(), deps)
        })
        .collect();

    let mut order = Vec::with_capacity(created.len());
    loop {
        let ready: Option<&str> = pending
            .iter()
            .find(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name);
        let Some(ready) = ready else {
            break;
        };
        pending.remove(ready);
        for deps in pending.values_mut() {
            deps.remove(ready);
        }
        order.push(ready.to_string());
    }
    order.extend(pending.keys().map(|name| (*name).to_string()));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::schema::{AbstractType, Column};

    fn posts(builder: &mut SchemaBuilder) {
        let posts = builder.table("posts");
        posts.primary("id");
        posts.integer("author_id");
        posts.string("title", 255);
    }

    #[test]
    fn new_table_is_one_create_statement() {
        let mut builder = SchemaBuilder::new("");
        posts(&mut builder);
        let plan = builder.plan(&SqliteDialect::new()).unwrap();
        assert_eq!(plan.tables.len(), 1);
        assert!(plan.tables[0].created);
        assert_eq!(plan.statements().len(), 1);
        let sql = plan.statements()[0];
        assert!(sql.starts_with("CREATE TABLE \"posts\""));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY"));
        assert!(sql.contains("\"author_id\""));
        assert!(sql.contains("\"title\""));
    }

    #[test]
    fn matching_table_is_skipped() {
        let dialect = SqliteDialect::new();
        let mut builder = SchemaBuilder::new("");
        posts(&mut builder);
        let current = SchemaBuilder::normalized(&dialect, builder.get("posts").unwrap());
        builder.table("posts").set_current(Some(current));
        assert!(builder.plan(&dialect).unwrap().is_empty());
    }

    #[test]
    fn passive_table_change_is_forbidden() {
        let mut builder = SchemaBuilder::new("");
        let mut current = TableState::new("legacy");
        current
            .columns
            .insert(String::from("id"), Column::new("id", AbstractType::Primary));
        current.primary_keys.push(String::from("id"));
        let legacy = builder.table("legacy");
        legacy.set_current(Some(current));
        legacy.passive(true);
        legacy.string("name", 64);
        posts(&mut builder);

        match builder.plan(&SqliteDialect::new()) {
            Err(DbalError::ForbiddenSchemaChange { table, columns, .. }) => {
                assert_eq!(table, "legacy");
                assert_eq!(columns, vec!["name"]);
            }
            other => panic!("expected forbidden change, got {other:?}"),
        }
    }

    #[test]
    fn primary_key_change_is_unsupported() {
        let mut builder = SchemaBuilder::new("");
        let mut current = TableState::new("tags");
        current
            .columns
            .insert(String::from("name"), Column::new("name", AbstractType::Text));
        builder.table("tags").set_current(Some(current));
        builder.table("tags").primary("id");
        assert!(matches!(
            builder.plan(&SqliteDialect::new()),
            Err(DbalError::UnsupportedSchemaChange { .. })
        ));
    }

    #[test]
    fn referenced_tables_are_created_first() {
        let mut builder = SchemaBuilder::new("p_");
        {
            let comments = builder.table("comments");
            comments.primary("id");
            comments.integer("post_id");
            comments.foreign_key("post_id", "posts", "id");
        }
        posts(&mut builder);
        {
            let authors = builder.table("authors");
            authors.primary("id");
        }
        builder.table("posts").foreign_key("author_id", "authors", "id");

        let plan = builder.plan(&PostgresDialect::new()).unwrap();
        let order: Vec<&str> = plan.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(order, vec!["authors", "posts", "comments"]);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn cyclic_foreign_keys_are_deferred() {
        let mut builder = SchemaBuilder::new("");
        {
            let a = builder.table("a");
            a.primary("id");
            a.integer("b_id");
            a.foreign_key("b_id", "b", "id");
        }
        {
            let b = builder.table("b");
            b.primary("id");
            b.integer("a_id");
            b.foreign_key("a_id", "a", "id");
        }

        let plan = builder.plan(&PostgresDialect::new()).unwrap();
        let order: Vec<&str> = plan.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(
            plan.deferred,
            vec![String::from(
                "ALTER TABLE \"a\" ADD CONSTRAINT \"a_foreign_b_id\" FOREIGN KEY (\"b_id\") REFERENCES \"b\" (\"id\") ON DELETE NO ACTION ON UPDATE NO ACTION"
            )]
        );

        // SQLite cannot add constraints later, both stay inline.
        let sqlite = builder.plan(&SqliteDialect::new()).unwrap();
        assert!(sqlite.deferred.is_empty());
        assert!(sqlite.tables[0].statements[0].contains("REFERENCES \"b\""));
    }
}
