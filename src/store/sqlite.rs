use async_trait::async_trait;
use rusqlite::{Connection, params};
use tracing::{debug, info};

use super::{
    BackingStore, ColumnDescriptor, PooledConnection, ResultSet, SqlitePool, StatementResult,
    StoreError, Target, Value, create_table_statement,
};

pub const METADATA_TABLE: &str = "dataproxy_metadata";

/// SQLite files standing in for the production and local databases.
///
/// Production is opened read-only. Every statement runs on the blocking pool
/// with a connection checked out of the target's pool.
pub struct SqliteBackends {
    production: SqlitePool,
    local: SqlitePool,
}

impl SqliteBackends {
    pub fn open(production_path: &str, local_path: &str, pool_size: usize) -> Result<Self, StoreError> {
        let production = SqlitePool::new(production_path, pool_size, true)?;
        let local = SqlitePool::new(local_path, pool_size, false)?;
        info!("Opened production store {} and local store {}", production_path, local_path);
        Ok(Self { production, local })
    }

    fn pool(&self, target: Target) -> &SqlitePool {
        match target {
            Target::Production => &self.production,
            Target::Local => &self.local,
        }
    }

    async fn with_connection<F, R>(&self, target: Target, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn: PooledConnection = self.pool(target).acquire().await?;
        tokio::task::spawn_blocking(move || f(&conn))
            .await
            .map_err(|e| StoreError::Worker(e.to_string()))?
    }

    /// Create the proxy's bookkeeping table in the local store and record
    /// the running version.
    pub async fn init_local_metadata(&self) -> Result<(), StoreError> {
        self.with_connection(Target::Local, |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {METADATA_TABLE} (
                    key TEXT NOT NULL PRIMARY KEY,
                    value TEXT,
                    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
                )"
            ))?;
            conn.execute(
                &format!(
                    "INSERT INTO {METADATA_TABLE} (key, value) VALUES ('version', ?1)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP"
                ),
                params![env!("CARGO_PKG_VERSION")],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn metadata_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_connection(Target::Local, move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT value FROM {METADATA_TABLE} WHERE key = ?1"))?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => Ok(row.get(0)?),
                None => Ok(None),
            }
        })
        .await
    }

    /// Round-trip `SELECT 1` against a target.
    pub async fn ping(&self, target: Target) -> Result<(), StoreError> {
        self.with_connection(target, |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

fn run_statement(conn: &Connection, sql: &str, params: &[Value]) -> Result<StatementResult, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        let rows_affected = stmt.execute(rusqlite::params_from_iter(params.iter()))?;
        return Ok(StatementResult::Done { rows_affected: rows_affected as u64 });
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let width = columns.len();
    let mut rows = Vec::new();
    let mut cursor = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(Value::from(row.get::<_, rusqlite::types::Value>(i)?));
        }
        rows.push(values);
    }
    Ok(StatementResult::Rows(ResultSet::new(columns, rows)))
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn read_schema(conn: &Connection, table: &str) -> Result<Option<Vec<ColumnDescriptor>>, StoreError> {
    if !table_exists(conn, table)? {
        return Ok(None);
    }

    let ddl: Option<String> = conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        params![table],
        |row| row.get(0),
    )?;
    let autoincrement = ddl.is_some_and(|sql| sql.to_uppercase().contains("AUTOINCREMENT"));

    // cid, name, type, notnull, dflt_value, pk
    let mut stmt = conn.prepare("SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid")?;
    let raw: Vec<(String, String, bool, Option<String>, i64)> = stmt
        .query_map(params![table], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?
        .collect::<Result<_, _>>()?;

    if raw.is_empty() {
        return Ok(None);
    }

    // A composite key cannot be written as a column modifier.
    let single_pk = raw.iter().filter(|c| c.4 > 0).count() == 1;

    let columns = raw
        .into_iter()
        .map(|(name, data_type, not_null, default, pk)| {
            let extra = if pk > 0 && single_pk {
                Some(if autoincrement { "PRIMARY KEY AUTOINCREMENT" } else { "PRIMARY KEY" }.to_string())
            } else {
                None
            };
            ColumnDescriptor {
                name,
                data_type,
                nullable: !not_null,
                default,
                extra,
            }
        })
        .collect();
    Ok(Some(columns))
}

#[async_trait]
impl BackingStore for SqliteBackends {
    async fn execute(
        &self,
        target: Target,
        sql: &str,
        params: &[Value],
    ) -> Result<StatementResult, StoreError> {
        debug!("Executing on {}: {}", target, sql.chars().take(100).collect::<String>());
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_connection(target, move |conn| run_statement(conn, &sql, &params))
            .await
    }

    async fn table_exists(&self, target: Target, table: &str) -> Result<bool, StoreError> {
        let table = table.to_string();
        self.with_connection(target, move |conn| table_exists(conn, &table)).await
    }

    async fn get_schema(
        &self,
        target: Target,
        table: &str,
    ) -> Result<Option<Vec<ColumnDescriptor>>, StoreError> {
        let table = table.to_string();
        self.with_connection(target, move |conn| read_schema(conn, &table)).await
    }

    async fn create_table(
        &self,
        target: Target,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<(), StoreError> {
        let sql = create_table_statement(table, columns);
        debug!("Creating table on {}: {}", target, sql);
        self.with_connection(target, move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    async fn list_tables(&self, target: Target) -> Result<Vec<String>, StoreError> {
        self.with_connection(target, |conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn close(&self) {
        self.production.close();
        self.local.close();
        info!("Closed all backing store connections");
    }
}
