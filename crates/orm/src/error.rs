//! Error types for the persistence core
//!
//! One crate-wide error enum covering schema definition, query translation,
//! change tracking, storage, and migration failures. Every variant carries
//! enough context (entity, table, column, operation id) to diagnose without
//! re-deriving state.

use thiserror::Error;

use crate::value::KeyValue;

/// Result type alias for persistence operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error type for all persistence operations
#[derive(Error, Debug, Clone)]
pub enum OrmError {
    /// Entity shape failed validation at registration or seal time
    #[error("schema definition error for entity '{entity}': {reason}")]
    SchemaDefinition { entity: String, reason: String },

    /// A query referenced a field that is not bound in the current scope
    #[error("field '{field}' is not in scope ({scope})")]
    UnboundField { field: String, scope: String },

    /// The query tree is composed in a way that has no relational meaning
    #[error("invalid query shape: {reason}")]
    InvalidQueryShape { reason: String },

    /// Unit-of-work misuse: stale handle, duplicate identity, key mutation
    #[error("tracking error for entity '{entity}': {reason}")]
    Tracking { entity: String, reason: String },

    /// Optimistic concurrency check failed at commit
    #[error("concurrency conflict on table '{table}' for key {key:?}: row was changed or removed by another writer")]
    ConcurrencyConflict { table: String, key: Vec<KeyValue> },

    /// Backend failure, propagated with its cause; never retried internally
    #[error("storage error during {context}: {message}")]
    Storage { context: String, message: String },

    /// Connection or pool failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Row not found where one was required
    #[error("record not found in table '{0}'")]
    NotFound(String),

    /// Migration applied out of sequence
    #[error("migration '{migration}' declares predecessor {expected:?} but the latest applied migration is {found:?}")]
    PrecedentMissing {
        migration: String,
        expected: Option<String>,
        found: Option<String>,
    },

    /// Non-transactional DDL backend failed mid-sequence
    #[error("migration '{migration}' partially applied: {} of {total} operations succeeded before '{failed}' failed: {message}", .applied.len())]
    PartialMigration {
        migration: String,
        applied: Vec<String>,
        total: usize,
        failed: String,
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl OrmError {
    /// Create a schema definition error
    pub fn schema(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        OrmError::SchemaDefinition {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error with context about where it occurred
    pub fn storage(context: impl Into<String>, message: impl Into<String>) -> Self {
        OrmError::Storage {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a tracking error
    pub fn tracking(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        OrmError::Tracking {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-query-shape error
    pub fn query_shape(reason: impl Into<String>) -> Self {
        OrmError::InvalidQueryShape {
            reason: reason.into(),
        }
    }

    /// True for errors that indicate caller misuse rather than runtime state;
    /// retrying the same call can never succeed.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            OrmError::SchemaDefinition { .. }
                | OrmError::UnboundField { .. }
                | OrmError::InvalidQueryShape { .. }
                | OrmError::Tracking { .. }
        )
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        OrmError::storage("database", err.to_string())
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = OrmError::ConcurrencyConflict {
            table: "authors".to_string(),
            key: vec![KeyValue::Int(7)],
        };
        let msg = err.to_string();
        assert!(msg.contains("authors"));
        assert!(msg.contains("Int(7)"));
    }

    #[test]
    fn test_partial_migration_reports_progress() {
        let err = OrmError::PartialMigration {
            migration: "0002_add_email".to_string(),
            applied: vec!["add_column authors.email".to_string()],
            total: 3,
            failed: "add_index idx_authors_email".to_string(),
            message: "syntax error".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1 of 3"));
        assert!(msg.contains("idx_authors_email"));
    }

    #[test]
    fn test_programmer_error_classification() {
        assert!(OrmError::query_shape("aggregate after take").is_programmer_error());
        assert!(!OrmError::storage("commit", "connection reset").is_programmer_error());
    }
}
