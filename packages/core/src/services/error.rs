//! Service Layer Error Types
//!
//! This module defines error types for hierarchy operations, layering tree
//! semantics on top of [`StoreError`].

use crate::db::StoreError;
use crate::models::ValidationError;
use std::time::Duration;
use thiserror::Error;

/// Hierarchy service errors
///
/// Query helpers that find nothing return empty results; only direct lookups
/// (`get`, `get_by_path`) report `NotFound`.
#[derive(Error, Debug)]
pub enum TreeError {
    /// Title, parent or node kind failed validation
    #[error("Node validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Node not found by id or exact path
    #[error("Node not found in {kind}: {key}")]
    NotFound { kind: String, key: String },

    /// A row lock could not be acquired within the backend's wait limit
    #[error("Timed out after {waited:?} waiting for lock on {kind}/{id}")]
    ConcurrencyTimeout {
        kind: String,
        id: String,
        waited: Duration,
    },

    /// The transaction failed and was rolled back; nothing was written
    #[error("Transaction aborted during {context}: {source}")]
    TransactionAborted {
        context: String,
        #[source]
        source: StoreError,
    },

    /// Delete refused because the node still has descendants
    #[error("Node {id} still has {count} descendant(s)")]
    HasDescendants { id: String, count: usize },

    /// Invalid service configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Store failure outside of a transaction
    #[error("Store operation failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for TreeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { table, id } => TreeError::NotFound {
                kind: table,
                key: id,
            },
            StoreError::LockTimeout { table, id, waited } => TreeError::ConcurrencyTimeout {
                kind: table,
                id,
                waited,
            },
            other => TreeError::Store(other),
        }
    }
}

impl TreeError {
    /// Create a not found error
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create a transaction aborted error
    pub fn transaction_aborted(context: impl Into<String>, source: StoreError) -> Self {
        Self::TransactionAborted {
            context: context.into(),
            source,
        }
    }

    /// Re-label a failure that happened inside a rolled back transaction
    ///
    /// Store failures become `TransactionAborted`; validation, lookup and
    /// lock timeout errors keep their own kind.
    pub fn aborted(self, context: impl Into<String>) -> Self {
        match self {
            TreeError::Store(source) => TreeError::transaction_aborted(context, source),
            other => other,
        }
    }

    /// Whether re-issuing the same operation later might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TreeError::ConcurrencyTimeout { .. })
    }
}
