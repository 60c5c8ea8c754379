use shared_models::error::AppError;
use thiserror::Error;

use crate::schema::EntityKind;

#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    #[error("Connection to {locator} failed: {reason}")]
    Connection { locator: String, reason: String },

    #[error("Connection to {locator} timed out after {timeout_ms} ms")]
    Timeout { locator: String, timeout_ms: u64 },

    #[error("Connection to {0} is not ready")]
    NotReady(String),

    #[error("Unsupported database locator: {0}")]
    UnsupportedLocator(String),

    #[error("Schema conflict on '{collection}': {reason}")]
    SchemaConflict { collection: String, reason: String },

    #[error("No {kind} schema registered for database '{database}'")]
    UnknownSchema { database: String, kind: EntityKind },

    #[error("Document in '{collection}' is missing required field '{field}'")]
    MissingField { collection: String, field: String },

    #[error("Duplicate key in '{collection}': {key}")]
    DuplicateKey { collection: String, key: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Query failed: {0}")]
    Query(String),
}

impl DatabaseError {
    /// Errors that mean the backing connection can no longer be trusted.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            DatabaseError::Connection { .. } | DatabaseError::Timeout { .. } | DatabaseError::NotReady(_)
        )
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Connection { .. } | DatabaseError::Timeout { .. } | DatabaseError::NotReady(_) => {
                AppError::ServiceUnavailable(err.to_string())
            }
            DatabaseError::SchemaConflict { .. } | DatabaseError::DuplicateKey { .. } => {
                AppError::Conflict(err.to_string())
            }
            DatabaseError::UnsupportedLocator(_) | DatabaseError::MissingField { .. } => {
                AppError::ValidationError(err.to_string())
            }
            DatabaseError::UnknownSchema { .. }
            | DatabaseError::Serialization(_)
            | DatabaseError::Query(_) => AppError::Database(err.to_string()),
        }
    }
}
