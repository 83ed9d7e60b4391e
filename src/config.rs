use clap::{Parser, Subcommand};

use crate::DataProxyError;

#[derive(Parser, Debug, Clone)]
#[command(name = "dataproxy")]
#[command(about = "dataproxy - SQL proxy that reads through a local shadow store and keeps every write off production", long_about = None)]
pub struct Config {
    // Listener
    #[arg(long, default_value = "127.0.0.1", env = "DATAPROXY_HOST", global = true)]
    pub host: String,

    #[arg(short, long, default_value = "3307", env = "DATAPROXY_PORT", global = true)]
    pub port: u16,

    #[arg(long, default_value = "100", env = "DATAPROXY_BACKLOG", global = true, help = "Maximum number of pending connections in the listen queue")]
    pub backlog: u32,

    #[arg(long, default_value = "info", env = "DATAPROXY_LOG_LEVEL", global = true)]
    pub log_level: String,

    // Backing stores
    #[arg(long, default_value = "production.db", env = "DATAPROXY_PRODUCTION_DB", global = true, help = "Path of the authoritative production database (opened read-only)")]
    pub production_db: String,

    #[arg(long, default_value = "dataproxy_local.db", env = "DATAPROXY_LOCAL_DB", global = true, help = "Path of the local shadow database receiving all writes")]
    pub local_db: String,

    #[arg(long, default_value = "10", env = "DATAPROXY_POOL_SIZE", global = true, help = "Maximum concurrent connections per backing store")]
    pub pool_size: usize,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the proxy server (default)
    Serve,
    /// Copy table schemas from production into the local store
    Sync {
        /// Only synchronize this table
        #[arg(long)]
        table: Option<String>,
    },
    /// Test connectivity to both stores and print a status report
    Check,
}

impl Config {
    pub fn load() -> Self {
        Config::parse()
    }

    /// Configuration for tests: ephemeral port, explicit store paths.
    pub fn for_stores(production_db: impl Into<String>, local_db: impl Into<String>) -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            backlog: 16,
            log_level: "info".to_string(),
            production_db: production_db.into(),
            local_db: local_db.into(),
            pool_size: 4,
            command: None,
        }
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject settings the server cannot start with. Port 0 is accepted so
    /// tests can bind an ephemeral port.
    pub fn validate(&self) -> Result<(), DataProxyError> {
        if self.backlog == 0 {
            return Err(DataProxyError::Config("backlog must be at least 1".to_string()));
        }
        if self.pool_size == 0 {
            return Err(DataProxyError::Config("pool size must be at least 1".to_string()));
        }
        if self.production_db.trim().is_empty() || self.local_db.trim().is_empty() {
            return Err(DataProxyError::Config("database paths must not be empty".to_string()));
        }
        if self.production_db == self.local_db {
            return Err(DataProxyError::Config(
                "production and local databases must be different files".to_string(),
            ));
        }
        Ok(())
    }
}
