// In-memory double of both stores for router and synchronizer tests
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use super::{BackingStore, ColumnDescriptor, ResultSet, StatementResult, StoreError, Target, Value};

#[derive(Default)]
pub(crate) struct MockStore {
    pub production_schemas: Mutex<HashMap<String, Vec<ColumnDescriptor>>>,
    pub local_tables: Mutex<HashSet<String>>,
    /// Statements that fail on the given target.
    pub failing: Mutex<HashSet<(Target, String)>>,
    pub fail_create: Mutex<HashSet<String>>,
    pub fail_exists: Mutex<bool>,
    pub rows: Mutex<HashMap<(Target, String), ResultSet>>,
    pub executed: Mutex<Vec<(Target, String)>>,
    pub schema_fetches: Mutex<Vec<String>>,
    pub creates: Mutex<Vec<String>>,
}

impl MockStore {
    pub fn with_production_table(self, table: &str) -> Self {
        self.production_schemas.lock().insert(
            table.to_string(),
            vec![
                ColumnDescriptor::new("id", "INTEGER").with_extra("PRIMARY KEY"),
                ColumnDescriptor::new("name", "TEXT"),
            ],
        );
        self
    }

    pub fn with_local_table(self, table: &str) -> Self {
        self.local_tables.lock().insert(table.to_string());
        self
    }

    pub fn with_rows(self, target: Target, sql: &str, rows: ResultSet) -> Self {
        self.rows.lock().insert((target, sql.to_string()), rows);
        self
    }

    pub fn failing_on(self, target: Target, sql: &str) -> Self {
        self.failing.lock().insert((target, sql.to_string()));
        self
    }

    pub fn executed_on(&self, target: Target) -> Vec<String> {
        self.executed
            .lock()
            .iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    fn failure(message: &str) -> StoreError {
        StoreError::Worker(message.to_string())
    }
}

#[async_trait]
impl BackingStore for MockStore {
    async fn execute(
        &self,
        target: Target,
        sql: &str,
        _params: &[Value],
    ) -> Result<StatementResult, StoreError> {
        self.executed.lock().push((target, sql.to_string()));
        if self.failing.lock().contains(&(target, sql.to_string())) {
            return Err(Self::failure("statement failed"));
        }
        if let Some(rows) = self.rows.lock().get(&(target, sql.to_string())) {
            return Ok(StatementResult::Rows(rows.clone()));
        }
        let upper = sql.trim_start().to_uppercase();
        if upper.starts_with("SELECT") {
            Ok(StatementResult::Rows(ResultSet::default()))
        } else {
            Ok(StatementResult::Done { rows_affected: 1 })
        }
    }

    async fn table_exists(&self, target: Target, table: &str) -> Result<bool, StoreError> {
        if *self.fail_exists.lock() {
            return Err(Self::failure("metadata query failed"));
        }
        Ok(match target {
            Target::Local => self.local_tables.lock().contains(table),
            Target::Production => self.production_schemas.lock().contains_key(table),
        })
    }

    async fn get_schema(
        &self,
        _target: Target,
        table: &str,
    ) -> Result<Option<Vec<ColumnDescriptor>>, StoreError> {
        self.schema_fetches.lock().push(table.to_string());
        Ok(self.production_schemas.lock().get(table).cloned())
    }

    async fn create_table(
        &self,
        _target: Target,
        table: &str,
        _columns: &[ColumnDescriptor],
    ) -> Result<(), StoreError> {
        self.creates.lock().push(table.to_string());
        if self.fail_create.lock().contains(table) {
            return Err(Self::failure("disk full"));
        }
        self.local_tables.lock().insert(table.to_string());
        Ok(())
    }

    async fn list_tables(&self, target: Target) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = match target {
            Target::Production => self.production_schemas.lock().keys().cloned().collect(),
            Target::Local => self.local_tables.lock().iter().cloned().collect(),
        };
        names.sort();
        Ok(names)
    }

    async fn close(&self) {}
}
