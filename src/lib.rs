pub mod config;
pub mod protocol;
pub mod query;
pub mod server;
pub mod session;
pub mod store;

pub use server::ProxyServer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataProxyError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Backing store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Schema synchronization error: {0}")]
    SchemaSync(#[from] session::SchemaSyncError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DataProxyError>;
