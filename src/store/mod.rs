// Backing stores the proxy routes statements to
pub mod pool;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub use pool::{PooledConnection, SqlitePool};
pub use sqlite::SqliteBackends;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Pool error: {0}")]
    Pool(String),
    #[error("Store worker failed: {0}")]
    Worker(String),
}

/// The two stores a statement can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Production,
    Local,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Production => f.write_str("production"),
            Target::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<rusqlite::types::Value> for Value {
    fn from(value: rusqlite::types::Value) -> Self {
        match value {
            rusqlite::types::Value::Null => Value::Null,
            rusqlite::types::Value::Integer(i) => Value::Integer(i),
            rusqlite::types::Value::Real(f) => Value::Real(f),
            rusqlite::types::Value::Text(s) => Value::Text(s),
            rusqlite::types::Value::Blob(b) => Value::Blob(b),
        }
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Text form used on the wire.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
            Value::Blob(b) => f.write_str(&hex::encode(b)),
        }
    }
}

/// Rows returned by a statement, columns in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    /// The statement produced a result set (possibly empty).
    Rows(ResultSet),
    /// The statement produced no result set.
    Done { rows_affected: u64 },
}

/// One column of a production table, as needed to recreate it locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub extra: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            extra: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    /// Column definition fragment: quoted name, raw type, then constraints.
    pub fn definition(&self) -> String {
        let mut def = format!("{} {}", quote_identifier(&self.name), self.data_type);
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        if let Some(extra) = self.extra.as_deref().filter(|e| !e.is_empty()) {
            def.push(' ');
            def.push_str(extra);
        }
        def
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Idempotent CREATE TABLE for `table` with the given columns.
pub fn create_table_statement(table: &str, columns: &[ColumnDescriptor]) -> String {
    let defs: Vec<String> = columns.iter().map(ColumnDescriptor::definition).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_identifier(table),
        defs.join(", ")
    )
}

/// Access to the production and local stores.
///
/// Implementations must be safe to call from many sessions at once.
/// `create_table` must be idempotent so racing synchronizers are harmless.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn execute(
        &self,
        target: Target,
        sql: &str,
        params: &[Value],
    ) -> Result<StatementResult, StoreError>;

    async fn table_exists(&self, target: Target, table: &str) -> Result<bool, StoreError>;

    /// Column layout of `table`, or `None` if the target has no such table.
    async fn get_schema(
        &self,
        target: Target,
        table: &str,
    ) -> Result<Option<Vec<ColumnDescriptor>>, StoreError>;

    async fn create_table(
        &self,
        target: Target,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<(), StoreError>;

    async fn list_tables(&self, target: Target) -> Result<Vec<String>, StoreError>;

    async fn close(&self);
}
