use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to open database at {path}: {source}")]
    Connection {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Migration failed: {reason}")]
    Migration { reason: String },

    #[error("Transaction {operation} failed: {source}")]
    Transaction {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Query failed while {context}: {source}")]
    Query {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

impl DatabaseError {
    pub fn connection(
        path: &Path,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            path: path.to_path_buf(),
            source: Box::new(source),
        }
    }

    pub fn transaction(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Transaction { operation, source }
    }

    pub fn query(context: &'static str, source: sqlx::Error) -> Self {
        Self::Query { context, source }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}
