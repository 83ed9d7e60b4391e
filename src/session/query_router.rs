use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::query::{ClassifiedQuery, LexicalClassifier, QueryType, StatementClassifier, safety};
use crate::query::classifier::extract_where_conditions;
use crate::session::schema_sync::{LocalTableRegistry, SchemaSynchronizer};
use crate::store::{BackingStore, ResultSet, StatementResult, StoreError, Target};

pub const UNKNOWN_STATEMENT_WARNING: &str = "Query type unknown, executed on production";

/// Where a statement ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutedTo {
    Local,
    Production,
    Rejected,
    Error,
}

/// What happened to one statement. Only the fields meaningful to each
/// destination are carried.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingOutcome {
    /// Refused by the safety denylist before touching any store.
    Rejected {
        query_type: QueryType,
        reason: String,
    },
    /// Executed against the local store.
    Local {
        query_type: QueryType,
        table_names: Vec<String>,
        data: Option<ResultSet>,
        rows_affected: Option<u64>,
    },
    /// Executed against production. `error` is only set for unrecognized
    /// statements, which report failure here instead of as `Error`.
    Production {
        query_type: QueryType,
        table_names: Vec<String>,
        data: Option<ResultSet>,
        error: Option<String>,
        warning: Option<String>,
    },
    /// Could not be carried out.
    Error {
        query_type: QueryType,
        table_names: Vec<String>,
        message: String,
    },
}

impl RoutingOutcome {
    pub fn success(&self) -> bool {
        match self {
            RoutingOutcome::Local { .. } => true,
            RoutingOutcome::Production { error, .. } => error.is_none(),
            RoutingOutcome::Rejected { .. } | RoutingOutcome::Error { .. } => false,
        }
    }

    pub fn routed_to(&self) -> RoutedTo {
        match self {
            RoutingOutcome::Rejected { .. } => RoutedTo::Rejected,
            RoutingOutcome::Local { .. } => RoutedTo::Local,
            RoutingOutcome::Production { .. } => RoutedTo::Production,
            RoutingOutcome::Error { .. } => RoutedTo::Error,
        }
    }

    pub fn query_type(&self) -> QueryType {
        match self {
            RoutingOutcome::Rejected { query_type, .. }
            | RoutingOutcome::Local { query_type, .. }
            | RoutingOutcome::Production { query_type, .. }
            | RoutingOutcome::Error { query_type, .. } => *query_type,
        }
    }

    pub fn table_names(&self) -> &[String] {
        match self {
            RoutingOutcome::Rejected { .. } => &[],
            RoutingOutcome::Local { table_names, .. }
            | RoutingOutcome::Production { table_names, .. }
            | RoutingOutcome::Error { table_names, .. } => table_names,
        }
    }

    pub fn data(&self) -> Option<&ResultSet> {
        match self {
            RoutingOutcome::Local { data, .. } | RoutingOutcome::Production { data, .. } => {
                data.as_ref()
            }
            _ => None,
        }
    }

    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            RoutingOutcome::Local { rows_affected, .. } => *rows_affected,
            _ => None,
        }
    }

    /// Message to report to the client when the statement did not succeed.
    pub fn error_message(&self) -> Option<String> {
        match self {
            RoutingOutcome::Rejected { reason, .. } => Some(reason.clone()),
            RoutingOutcome::Error { message, .. } => Some(message.clone()),
            RoutingOutcome::Production { error: Some(e), warning, .. } => Some(match warning {
                Some(w) => format!("{e} ({w})"),
                None => e.clone(),
            }),
            _ => None,
        }
    }
}

/// Decides which store runs a statement and keeps the local schema in step
/// with production for writes. Production never receives a write from here.
pub struct QueryRouter {
    store: Arc<dyn BackingStore>,
    classifier: Arc<dyn StatementClassifier>,
    synchronizer: SchemaSynchronizer,
}

impl QueryRouter {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self::with_classifier(store, Arc::new(LexicalClassifier))
    }

    pub fn with_classifier(
        store: Arc<dyn BackingStore>,
        classifier: Arc<dyn StatementClassifier>,
    ) -> Self {
        let synchronizer = SchemaSynchronizer::new(store.clone(), Arc::new(LocalTableRegistry::new()));
        Self {
            store,
            classifier,
            synchronizer,
        }
    }

    pub fn synchronizer(&self) -> &SchemaSynchronizer {
        &self.synchronizer
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub async fn route(&self, sql: &str) -> RoutingOutcome {
        let classified = self.classifier.classify(sql);

        if let Err(rejection) = safety::check(sql) {
            warn!("Rejected statement: {}", rejection);
            return RoutingOutcome::Rejected {
                query_type: classified.query_type,
                reason: "Query contains potentially dangerous operations".to_string(),
            };
        }

        info!(
            "Routing {} query: {}",
            classified.query_type,
            sql.trim().chars().take(100).collect::<String>()
        );
        if let Some(conditions) = extract_where_conditions(sql) {
            debug!("WHERE conditions: {}", conditions);
        }

        let query_type = classified.query_type;
        let result = match query_type {
            QueryType::Read => self.route_read(&classified).await,
            QueryType::Write => Ok(self.route_write(&classified).await),
            QueryType::Unknown => Ok(self.route_unknown(&classified).await),
        };

        result.unwrap_or_else(|e| {
            error!("Error routing query: {}", e);
            RoutingOutcome::Error {
                query_type,
                table_names: classified.table_names.clone(),
                message: e.to_string(),
            }
        })
    }

    async fn route_read(&self, query: &ClassifiedQuery) -> Result<RoutingOutcome, StoreError> {
        let tables = &query.table_names;

        let mut all_local = !tables.is_empty();
        for table in tables {
            if !self.synchronizer.registry().exists(self.store.as_ref(), table).await? {
                all_local = false;
                break;
            }
        }

        if all_local {
            info!("All tables exist locally, reading from local database");
            match self.store.execute(Target::Local, &query.original, &[]).await {
                Ok(result) => {
                    return Ok(RoutingOutcome::Local {
                        query_type: QueryType::Read,
                        table_names: tables.clone(),
                        data: Some(rows_of(result)),
                        rows_affected: None,
                    });
                }
                Err(e) => warn!("Local query failed, falling back to production: {}", e),
            }
        }

        info!("Reading from production database");
        let result = self.store.execute(Target::Production, &query.original, &[]).await?;
        Ok(RoutingOutcome::Production {
            query_type: QueryType::Read,
            table_names: tables.clone(),
            data: Some(rows_of(result)),
            error: None,
            warning: None,
        })
    }

    async fn route_write(&self, query: &ClassifiedQuery) -> RoutingOutcome {
        let tables = &query.table_names;
        let failed = |message: String| RoutingOutcome::Error {
            query_type: QueryType::Write,
            table_names: tables.clone(),
            message,
        };

        if tables.is_empty() {
            return failed("No table names found in write query".to_string());
        }

        for table in tables {
            if let Err(e) = self.synchronizer.ensure_local_table(table).await {
                error!("Schema synchronization failed: {}", e);
                return failed(e.to_string());
            }
        }

        info!("Executing write query on local database");
        match self.store.execute(Target::Local, &query.original, &[]).await {
            Ok(StatementResult::Done { rows_affected }) => RoutingOutcome::Local {
                query_type: QueryType::Write,
                table_names: tables.clone(),
                data: None,
                rows_affected: counts_rows(&query.original).then_some(rows_affected),
            },
            Ok(StatementResult::Rows(rows)) => RoutingOutcome::Local {
                query_type: QueryType::Write,
                table_names: tables.clone(),
                rows_affected: counts_rows(&query.original).then_some(rows.rows.len() as u64),
                data: Some(rows),
            },
            Err(e) => {
                error!("Write query failed on local database: {}", e);
                failed(format!("Write query failed on local database: {e}"))
            }
        }
    }

    async fn route_unknown(&self, query: &ClassifiedQuery) -> RoutingOutcome {
        warn!(
            "Unknown query type, attempting production execution: {}",
            query.original.trim().chars().take(100).collect::<String>()
        );

        let (data, error) = match self.store.execute(Target::Production, &query.original, &[]).await {
            Ok(StatementResult::Rows(rows)) => (Some(rows), None),
            Ok(StatementResult::Done { .. }) => (None, None),
            Err(e) => (None, Some(e.to_string())),
        };

        RoutingOutcome::Production {
            query_type: QueryType::Unknown,
            table_names: query.table_names.clone(),
            data,
            error,
            warning: Some(UNKNOWN_STATEMENT_WARNING.to_string()),
        }
    }
}

fn rows_of(result: StatementResult) -> ResultSet {
    match result {
        StatementResult::Rows(rows) => rows,
        StatementResult::Done { .. } => ResultSet::default(),
    }
}

/// Row-count reporting applies to single-table DML only.
fn counts_rows(sql: &str) -> bool {
    let upper = crate::query::normalize_sql(sql).to_uppercase();
    ["INSERT", "UPDATE", "DELETE", "REPLACE"]
        .iter()
        .any(|kw| upper.starts_with(kw))
}
