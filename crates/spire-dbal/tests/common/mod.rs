#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use spire_dbal::{
    Database, DbalError, Dialect, Driver, ExecOutcome, QueryResult, Result, SqlValue, TableState,
};

/// Driver that records every statement instead of running it.
#[derive(Debug)]
pub struct RecordingDriver {
    dialect: Box<dyn Dialect>,
    log: Mutex<Vec<(String, Vec<SqlValue>)>>,
    tables: Mutex<BTreeMap<String, TableState>>,
    responses: Mutex<VecDeque<QueryResult>>,
    fail_on: Mutex<Option<String>>,
}

impl RecordingDriver {
    pub fn new(dialect: impl Dialect + 'static) -> Self {
        Self {
            dialect: Box::new(dialect),
            log: Mutex::new(Vec::new()),
            tables: Mutex::new(BTreeMap::new()),
            responses: Mutex::new(VecDeque::new()),
            fail_on: Mutex::new(None),
        }
    }

    /// Statements seen so far.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Statements with their parameters.
    pub fn entries(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Makes `state` visible to introspection.
    pub fn set_table(&self, state: TableState) {
        self.tables.lock().unwrap().insert(state.name.clone(), state);
    }

    /// Queues the result of the next query.
    pub fn respond(&self, result: QueryResult) {
        self.responses.lock().unwrap().push_back(result);
    }

    /// Fails every statement containing `fragment`.
    pub fn fail_on(&self, fragment: &str) {
        *self.fail_on.lock().unwrap() = Some(fragment.to_string());
    }

    fn record(&self, sql: &str, params: &[SqlValue]) -> Result<()> {
        if let Some(ref fragment) = *self.fail_on.lock().unwrap() {
            if sql.contains(fragment.as_str()) {
                return Err(DbalError::driver(sql, params, "rejected by test driver"));
            }
        }
        self.log
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(())
    }
}

impl Driver for RecordingDriver {
    fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.record(sql, params)?;
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecOutcome> {
        self.record(sql, params)?;
        Ok(ExecOutcome {
            rows_affected: 1,
            last_insert_id: Some(1),
        })
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.tables.lock().unwrap().keys().cloned().collect())
    }

    async fn table_state(&self, table: &str) -> Result<Option<TableState>> {
        Ok(self.tables.lock().unwrap().get(table).cloned())
    }

    async fn begin(&self) -> Result<()> {
        self.record("BEGIN", &[])
    }

    async fn commit(&self) -> Result<()> {
        self.record("COMMIT", &[])
    }

    async fn rollback(&self) -> Result<()> {
        self.record("ROLLBACK", &[])
    }
}

pub fn database(dialect: impl Dialect + 'static, prefix: &str) -> Database<RecordingDriver> {
    Database::new("default", prefix, RecordingDriver::new(dialect))
}
