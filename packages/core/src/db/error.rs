//! Database Error Types
//!
//! This module defines error types for row store operations, covering
//! connection failures, lock waits, constraint violations and row decoding.

use crate::models::NodeId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Row store errors
///
/// Lookups that find nothing report `NotFound`; predicate queries return an
/// empty cursor instead. More specific tree errors are handled by
/// service-layer error types.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Row lookup by id found nothing
    #[error("Row not found in {table}: {id}")]
    NotFound { table: String, id: String },

    /// A row lock could not be acquired within the configured wait limit
    #[error("Timed out after {waited:?} waiting for lock on {table}/{id}")]
    LockTimeout {
        table: String,
        id: String,
        waited: Duration,
    },

    /// Two rows of one table would share a path
    #[error("Duplicate path in {table}: {path}")]
    UniqueViolation { table: String, path: String },

    /// The transaction was already committed or rolled back
    #[error("Transaction is no longer active")]
    TransactionClosed,

    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    Database(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecution { context: String },

    /// Properties column could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded
    #[error("Invalid row: {0:#}")]
    InvalidRow(#[from] anyhow::Error),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(table: impl Into<String>, id: &NodeId) -> Self {
        Self::NotFound {
            table: table.into(),
            id: id.to_string(),
        }
    }

    /// Create a lock timeout error
    pub fn lock_timeout(table: impl Into<String>, id: impl Into<String>, waited: Duration) -> Self {
        Self::LockTimeout {
            table: table.into(),
            id: id.into(),
            waited,
        }
    }

    /// Create a unique violation error
    pub fn unique_violation(table: impl Into<String>, path: impl Into<String>) -> Self {
        Self::UniqueViolation {
            table: table.into(),
            path: path.into(),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecution {
            context: context.into(),
        }
    }

    /// Whether retrying the whole operation later might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }
}
