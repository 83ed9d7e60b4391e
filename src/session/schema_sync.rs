use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{BackingStore, StoreError, Target};

#[derive(Error, Debug)]
pub enum SchemaSyncError {
    #[error("Failed to get schema for table: {0}")]
    SchemaNotFound(String),
    #[error("Failed to create local table {table}: {source}")]
    CreateFailed {
        table: String,
        #[source]
        source: StoreError,
    },
    #[error("Schema lookup for table {table} failed: {source}")]
    Lookup {
        table: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    AlreadyPresent,
    Created,
}

/// Tables confirmed to exist in the local store.
///
/// Filled from live existence checks. Routing always asks the store; this
/// set only feeds status reporting.
#[derive(Debug, Default)]
pub struct LocalTableRegistry {
    known: RwLock<HashSet<String>>,
}

impl LocalTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authoritative existence check, recorded in the registry.
    pub async fn exists(&self, store: &dyn BackingStore, table: &str) -> Result<bool, StoreError> {
        let exists = store.table_exists(Target::Local, table).await?;
        self.record(table, exists);
        Ok(exists)
    }

    fn record(&self, table: &str, exists: bool) {
        if exists {
            if !self.known.read().contains(table) {
                self.known.write().insert(table.to_string());
            }
        } else {
            self.known.write().remove(table);
        }
    }

    pub fn mark_present(&self, table: &str) {
        self.record(table, true);
    }

    pub fn known_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.known.read().iter().cloned().collect();
        tables.sort();
        tables
    }
}

/// Materializes production tables in the local store on demand.
pub struct SchemaSynchronizer {
    store: Arc<dyn BackingStore>,
    registry: Arc<LocalTableRegistry>,
}

impl SchemaSynchronizer {
    pub fn new(store: Arc<dyn BackingStore>, registry: Arc<LocalTableRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<LocalTableRegistry> {
        &self.registry
    }

    /// Make sure `table` exists locally, copying its layout from production
    /// when it does not. Concurrent calls for the same table may both fetch
    /// the schema; the create is idempotent.
    pub async fn ensure_local_table(&self, table: &str) -> Result<SyncAction, SchemaSyncError> {
        let exists = self
            .registry
            .exists(self.store.as_ref(), table)
            .await
            .map_err(|source| SchemaSyncError::Lookup { table: table.to_string(), source })?;
        if exists {
            debug!("Table {} already present locally", table);
            return Ok(SyncAction::AlreadyPresent);
        }

        info!("Creating local table: {}", table);
        let columns = self
            .store
            .get_schema(Target::Production, table)
            .await
            .map_err(|source| SchemaSyncError::Lookup { table: table.to_string(), source })?
            .filter(|cols| !cols.is_empty())
            .ok_or_else(|| SchemaSyncError::SchemaNotFound(table.to_string()))?;

        self.store
            .create_table(Target::Local, table, &columns)
            .await
            .map_err(|source| SchemaSyncError::CreateFailed { table: table.to_string(), source })?;

        self.registry.mark_present(table);
        info!("Created local table {} with {} columns", table, columns.len());
        Ok(SyncAction::Created)
    }

    /// Synchronize every table production knows about. One table failing
    /// does not stop the others.
    pub async fn sync_all(
        &self,
    ) -> Result<BTreeMap<String, Result<SyncAction, SchemaSyncError>>, StoreError> {
        let tables = self.store.list_tables(Target::Production).await?;
        info!("Found {} tables in production", tables.len());

        let mut results = BTreeMap::new();
        for table in tables {
            let result = self.ensure_local_table(&table).await;
            if let Err(e) = &result {
                warn!("Failed to sync table {}: {}", table, e);
            }
            results.insert(table, result);
        }
        Ok(results)
    }

    /// Re-check every table the registry has seen and report which are
    /// still present locally.
    pub async fn local_table_status(&self) -> Result<BTreeMap<String, bool>, StoreError> {
        let mut status = BTreeMap::new();
        for table in self.registry.known_tables() {
            let exists = self.registry.exists(self.store.as_ref(), &table).await?;
            status.insert(table, exists);
        }
        Ok(status)
    }
}
