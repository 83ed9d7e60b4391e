use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use super::StoreError;

const LOCAL_PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;";

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed-size pool of SQLite connections to one database file.
pub struct SqlitePool {
    path: String,
    read_only: bool,
    connections: Arc<Mutex<Vec<Connection>>>,
    semaphore: Arc<Semaphore>,
}

impl SqlitePool {
    /// Open a pool and eagerly create one connection so a bad path fails here
    /// rather than on the first statement.
    pub fn new(path: &str, max_connections: usize, read_only: bool) -> Result<Self, StoreError> {
        let max_connections = max_connections.max(1);
        let pool = SqlitePool {
            path: path.to_string(),
            read_only,
            connections: Arc::new(Mutex::new(Vec::with_capacity(max_connections))),
            semaphore: Arc::new(Semaphore::new(max_connections)),
        };

        let conn = pool.open_connection()?;
        pool.connections.lock().push(conn);

        Ok(pool)
    }

    fn open_connection(&self) -> Result<Connection, StoreError> {
        let flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };

        debug!("Opening connection to {} (read_only: {})", self.path, self.read_only);
        let conn = Connection::open_with_flags(&self.path, flags)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if !self.read_only {
            conn.execute_batch(LOCAL_PRAGMAS)?;
        }
        Ok(conn)
    }

    pub async fn acquire(&self) -> Result<PooledConnection, StoreError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Pool(format!("pool for {} is closed", self.path)))?;

        let conn = self.connections.lock().pop();
        let conn = match conn {
            Some(c) => c,
            None => self.open_connection()?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.connections.clone(),
            semaphore: self.semaphore.clone(),
            _permit: permit,
        })
    }

    pub fn idle_connections(&self) -> usize {
        self.connections.lock().len()
    }

    /// Refuse new checkouts and drop idle connections. Checked-out
    /// connections are dropped when their holders release them.
    pub fn close(&self) {
        self.semaphore.close();
        let drained: Vec<Connection> = self.connections.lock().drain(..).collect();
        debug!("Closed {} idle connections to {}", drained.len(), self.path);
    }
}

pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<Mutex<Vec<Connection>>>,
    semaphore: Arc<Semaphore>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        // Only taken in Drop.
        self.conn.as_ref().unwrap()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // A closed pool lets the connection drop instead of recycling it.
            if !self.semaphore.is_closed() {
                self.pool.lock().push(conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connections_are_recycled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let pool = SqlitePool::new(path.to_str().unwrap(), 2, false).unwrap();
        assert_eq!(pool.idle_connections(), 1);

        {
            let a = pool.acquire().await.unwrap();
            let b = pool.acquire().await.unwrap();
            a.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
            let n: i64 = b.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
            assert_eq!(n, 0);
        }

        assert_eq!(pool.idle_connections(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let pool = SqlitePool::new(path.to_str().unwrap(), 1, false).unwrap();
        pool.close();
        assert!(matches!(pool.acquire().await, Err(StoreError::Pool(_))));
        assert_eq!(pool.idle_connections(), 0);
    }

    #[test]
    fn test_read_only_pool_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        assert!(SqlitePool::new(path.to_str().unwrap(), 1, true).is_err());
    }
}
