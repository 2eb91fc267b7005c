//! Row Store Traits - Storage Abstraction Layer
//!
//! This module defines the `TransactionalRowStore` trait that the hierarchy
//! service consumes. The trait enables multiple backend implementations
//! (in-process [`MemoryStore`](super::MemoryStore), libsql
//! [`TursoStore`](super::TursoStore)) without changing tree logic.
//!
//! # Architecture
//!
//! - **Unlocked reads**: `get_by_id`, `find` and `count` on the store see
//!   committed state only and never block on row locks
//! - **Transactions**: `begin_transaction` returns a [`StoreTransaction`]
//!   owned by a single task; all mutation goes through it
//! - **Row locks**: `lock_for_update` claims rows exclusively until the
//!   transaction commits or rolls back
//! - **Guaranteed rollback**: a transaction dropped without `commit` discards
//!   its writes and releases its locks
//!
//! # Examples
//!
//! ```rust,no_run
//! use pathtree_core::db::{MemoryStore, NodeFilter, StoreTransaction, TransactionalRowStore};
//! use pathtree_core::models::NewNodeRecord;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), pathtree_core::db::StoreError> {
//! let store = MemoryStore::new(Default::default());
//! store.ensure_table("categories").await?;
//!
//! let mut tx = store.begin_transaction().await?;
//! tx.insert(
//!     "categories",
//!     NewNodeRecord {
//!         title: "Fruit".to_string(),
//!         path: "Fruit".to_string(),
//!         parent_id: None,
//!         is_container: false,
//!         properties: json!({}),
//!     },
//! )
//! .await?;
//! tx.commit().await?;
//!
//! let roots = store
//!     .find("categories", &NodeFilter::new().with_is_root(true))
//!     .await?;
//! assert_eq!(roots.count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::db::StoreError;
use crate::models::{NewNodeRecord, NodeField, NodeId, NodeRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sort order for query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    PathAsc,
    PathDesc,
}

/// Predicate over node rows
///
/// All set fields must match (logical AND). Built with the `with_*` methods:
///
/// ```rust
/// use pathtree_core::db::{NodeFilter, OrderBy};
///
/// let filter = NodeFilter::new()
///     .with_path_prefix("Fruit/")
///     .with_is_container(false)
///     .with_order_by(OrderBy::PathAsc);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFilter {
    /// Filter by id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,

    /// Exclude one id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_id: Option<NodeId>,

    /// Exact path match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Path is one of the given values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,

    /// Path starts with this string (subtree scan on the path index)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    /// Exact title match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Filter by parent id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,

    /// Filter for root nodes only (`true`) or non-roots only (`false`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_root: Option<bool>,

    /// Filter by the stored container column
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_container: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl NodeFilter {
    /// Create a new empty filter (matches every row)
    pub fn new() -> Self {
        Self::default()
    }

    /// Select one row by id
    pub fn by_id(id: NodeId) -> Self {
        Self::new().with_id(id)
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_exclude_id(mut self, id: NodeId) -> Self {
        self.exclude_id = Some(id);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_parent_id(mut self, parent_id: NodeId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_is_root(mut self, is_root: bool) -> Self {
        self.is_root = Some(is_root);
        self
    }

    pub fn with_is_container(mut self, is_container: bool) -> Self {
        self.is_container = Some(is_container);
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate the predicate part of the filter against a row
    ///
    /// Ordering and limit are applied by [`NodeFilter::apply`].
    pub fn matches(&self, record: &NodeRecord) -> bool {
        if let Some(id) = &self.id {
            if &record.id != id {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude_id {
            if &record.id == exclude {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if &record.path != path {
                return false;
            }
        }
        if let Some(paths) = &self.paths {
            if !paths.iter().any(|p| p == &record.path) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !record.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(title) = &self.title {
            if &record.title != title {
                return false;
            }
        }
        if let Some(parent_id) = &self.parent_id {
            if record.parent_id.as_ref() != Some(parent_id) {
                return false;
            }
        }
        if let Some(is_root) = self.is_root {
            if record.parent_id.is_none() != is_root {
                return false;
            }
        }
        if let Some(is_container) = self.is_container {
            if record.is_container != is_container {
                return false;
            }
        }
        true
    }

    /// Filter, order and limit an in-memory row set
    pub fn apply(&self, records: impl IntoIterator<Item = NodeRecord>) -> Vec<NodeRecord> {
        let mut matched: Vec<NodeRecord> = records
            .into_iter()
            .filter(|record| self.matches(record))
            .collect();

        match self.order_by {
            Some(OrderBy::PathAsc) => matched.sort_by(|a, b| a.path.cmp(&b.path)),
            Some(OrderBy::PathDesc) => matched.sort_by(|a, b| b.path.cmp(&a.path)),
            None => {}
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }

        matched
    }
}

/// Query cursor over rows
///
/// Finite and consumed as it is iterated; it cannot be restarted. Ordering is
/// unspecified unless the filter asked for one.
#[derive(Debug)]
pub struct RowCursor {
    rows: std::vec::IntoIter<NodeRecord>,
}

impl RowCursor {
    pub fn new(rows: Vec<NodeRecord>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl Iterator for RowCursor {
    type Item = NodeRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for RowCursor {}

/// Storage engine consumed by the hierarchy service
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so a single store can serve many
/// concurrent transactions from different tasks.
#[async_trait]
pub trait TransactionalRowStore: Send + Sync {
    type Transaction: StoreTransaction;

    /// Create the table (and its path/parent indexes) if it does not exist
    async fn ensure_table(&self, table: &str) -> Result<(), StoreError>;

    /// Open a new transaction
    async fn begin_transaction(&self) -> Result<Self::Transaction, StoreError>;

    /// Committed row by primary key, or `StoreError::NotFound`
    async fn get_by_id(&self, table: &str, id: &NodeId) -> Result<NodeRecord, StoreError>;

    /// Committed rows matching `filter`, without taking locks
    async fn find(&self, table: &str, filter: &NodeFilter) -> Result<RowCursor, StoreError>;

    /// Number of committed rows matching `filter`
    async fn count(&self, table: &str, filter: &NodeFilter) -> Result<usize, StoreError>;
}

/// A transaction scope on a [`TransactionalRowStore`]
///
/// Reads inside the transaction observe its own uncommitted writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Lock every row matching `filter` and return their current values
    ///
    /// Blocks while another transaction holds any of those rows, up to the
    /// backend's lock timeout (`StoreError::LockTimeout`). Locking a row this
    /// transaction already holds is a no-op.
    async fn lock_for_update(
        &mut self,
        table: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeRecord>, StoreError>;

    /// Rows matching `filter` as seen by this transaction
    async fn find(&mut self, table: &str, filter: &NodeFilter)
        -> Result<Vec<NodeRecord>, StoreError>;

    /// Number of rows matching `filter` as seen by this transaction
    async fn count(&mut self, table: &str, filter: &NodeFilter) -> Result<usize, StoreError>;

    /// Insert a row; the store assigns its id and timestamps
    async fn insert(&mut self, table: &str, row: NewNodeRecord) -> Result<NodeRecord, StoreError>;

    /// Persist only the named fields of `record`
    async fn update_fields(
        &mut self,
        table: &str,
        record: &NodeRecord,
        fields: &[NodeField],
    ) -> Result<(), StoreError>;

    /// Delete one row
    async fn delete(&mut self, table: &str, id: &NodeId) -> Result<(), StoreError>;

    /// Make every write visible atomically and release all locks
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard every write and release all locks
    async fn rollback(&mut self) -> Result<(), StoreError>;
}
