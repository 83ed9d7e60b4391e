// Module for per-connection state and statement routing
pub mod query_router;
pub mod schema_sync;
pub mod state;

pub use query_router::{QueryRouter, RoutedTo, RoutingOutcome, UNKNOWN_STATEMENT_WARNING};
pub use schema_sync::{LocalTableRegistry, SchemaSyncError, SchemaSynchronizer, SyncAction};
pub use state::{SessionPhase, SessionState};
