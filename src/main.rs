use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use dataproxy::ProxyServer;
use dataproxy::config::{Command, Config};
use dataproxy::session::{QueryRouter, SyncAction};
use dataproxy::store::{BackingStore, SqliteBackends, Target};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();

    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.clone())
        .init();

    info!("dataproxy v{}", env!("CARGO_PKG_VERSION"));
    config.validate()?;

    let store = Arc::new(
        SqliteBackends::open(&config.production_db, &config.local_db, config.pool_size)
            .with_context(|| format!("Failed to open stores {} and {}", config.production_db, config.local_db))?,
    );
    store.init_local_metadata().await?;

    let result = match config.command() {
        Command::Serve => serve(&config, store.clone()).await,
        Command::Sync { table } => sync(store.clone(), table).await,
        Command::Check => check(&config, &store).await,
    };

    store.close().await;
    result
}

async fn verify_connectivity(store: &SqliteBackends) -> Result<()> {
    for target in [Target::Production, Target::Local] {
        store
            .ping(target)
            .await
            .with_context(|| format!("{target} database is not reachable"))?;
    }
    Ok(())
}

async fn serve(config: &Config, store: Arc<SqliteBackends>) -> Result<()> {
    verify_connectivity(&store).await?;
    info!("Database connections established");

    let backing: Arc<dyn BackingStore> = store;
    let router = Arc::new(QueryRouter::new(backing));
    let server = Arc::new(ProxyServer::bind(config, router).await?);
    info!("DataProxy server started on {}", server.local_addr());

    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt, shutting down");
    server.shutdown();

    serving.await??;
    Ok(())
}

async fn sync(store: Arc<SqliteBackends>, table: Option<String>) -> Result<()> {
    let backing: Arc<dyn BackingStore> = store;
    let router = QueryRouter::new(backing);
    let synchronizer = router.synchronizer();

    let results = match table {
        Some(table) => {
            let mut results = BTreeMap::new();
            let outcome = synchronizer.ensure_local_table(&table).await;
            results.insert(table, outcome);
            results
        }
        None => synchronizer.sync_all().await?,
    };

    let mut failures = 0;
    for (table, outcome) in &results {
        match outcome {
            Ok(SyncAction::Created) => info!("{}: created", table),
            Ok(SyncAction::AlreadyPresent) => info!("{}: already present", table),
            Err(e) => {
                failures += 1;
                error!("{}: {}", table, e);
            }
        }
    }

    info!("Synchronized {} of {} tables", results.len() - failures, results.len());
    if failures > 0 {
        anyhow::bail!("{failures} table(s) failed to synchronize");
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    version: &'static str,
    listen_address: String,
    production_db: String,
    local_db: String,
    pool_size: usize,
    connectivity: BTreeMap<Target, bool>,
    metadata_version: Option<String>,
    local_tables: Vec<String>,
}

async fn check(config: &Config, store: &SqliteBackends) -> Result<()> {
    let mut connectivity = BTreeMap::new();
    for target in [Target::Production, Target::Local] {
        let reachable = match store.ping(target).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{} database check failed: {}", target, e);
                false
            }
        };
        connectivity.insert(target, reachable);
    }

    let report = StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        listen_address: config.listen_address(),
        production_db: config.production_db.clone(),
        local_db: config.local_db.clone(),
        pool_size: config.pool_size,
        connectivity,
        metadata_version: store.metadata_value("version").await?,
        local_tables: store.list_tables(Target::Local).await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.connectivity.values().all(|ok| *ok) {
        Ok(())
    } else {
        anyhow::bail!("connectivity check failed")
    }
}
