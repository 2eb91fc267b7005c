//! Node Data Structures
//!
//! This module defines the storage-facing row model (`NodeRecord`) and the
//! `HierarchicalNode` capability trait that every node kind implements.
//!
//! # Architecture
//!
//! - **Flat table**: Every node kind lives in its own table of rows carrying
//!   `id`, `title`, `path`, `parent_id` and `is_container`
//! - **Materialized path**: `path` holds the `/`-joined titles of the whole
//!   ancestor chain, most distant ancestor first
//! - **Pure JSON payload**: Kind-specific fields are stored in `properties`
//! - **Static container capability**: Each kind declares once whether its
//!   container flag is persisted ([`ContainerFlag::Stored`]) or computed from
//!   child presence on read ([`ContainerFlag::Derived`])
//!
//! # Examples
//!
//! ```rust
//! use pathtree_core::models::{Category, HierarchicalNode};
//!
//! let fruit = Category::new("Fruit");
//! assert_eq!(fruit.title(), "Fruit");
//! assert!(fruit.id().is_none());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for node operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Title is empty after normalization: {0:?}")]
    EmptyTitle(String),

    #[error("Title exceeds {max} characters ({actual})")]
    TitleTooLong { max: usize, actual: usize },

    #[error("Path depth {depth} exceeds the configured maximum of {max}")]
    PathTooDeep { depth: usize, max: usize },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid node kind: {0}")]
    InvalidKind(String),

    #[error("Invalid parent reference: {0}")]
    InvalidParent(String),

    #[error("Node {node_id} cannot be placed under {parent_id}: parent is the node itself or one of its descendants")]
    CircularParent { node_id: String, parent_id: String },

    #[error("Properties validation failed: {0}")]
    InvalidProperties(String),
}

/// Stable node identity, assigned by the store on creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an identifier read back from storage
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// How a node kind maintains its `is_container` flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFlag {
    /// The flag is a persisted column, kept in sync on every structural save
    Stored,
    /// The flag is computed on read from the presence of children
    Derived,
}

impl ContainerFlag {
    pub fn is_stored(self) -> bool {
        matches!(self, ContainerFlag::Stored)
    }
}

/// Columns that can be persisted individually via `update_fields`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeField {
    Title,
    Path,
    Parent,
    IsContainer,
    Properties,
}

impl NodeField {
    /// Column name in the row schema
    pub fn column(self) -> &'static str {
        match self {
            NodeField::Title => "title",
            NodeField::Path => "path",
            NodeField::Parent => "parent_id",
            NodeField::IsContainer => "is_container",
            NodeField::Properties => "properties",
        }
    }
}

/// A persisted row as returned by the store
///
/// `has_children` is not a column: the store computes it on every read so that
/// kinds with a [`ContainerFlag::Derived`] flag can answer `is_container`
/// without a second round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: NodeId,
    pub title: String,
    pub path: String,
    pub parent_id: Option<NodeId>,
    pub is_container: bool,
    pub properties: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub has_children: bool,
}

/// Row data for an insert; the store assigns `id` and timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct NewNodeRecord {
    pub title: String,
    pub path: String,
    pub parent_id: Option<NodeId>,
    pub is_container: bool,
    pub properties: serde_json::Value,
}

/// Capability interface implemented by every node kind
///
/// A node is anything exposing get/set access to `title`, `path`, `parent` and
/// `is_container`, plus the static declarations the tree needs to resolve its
/// storage once, when the kind is registered with a
/// [`HierarchicalTree`](crate::services::HierarchicalTree).
pub trait HierarchicalNode: Clone + Send + Sync + 'static {
    /// Table storing this kind
    const TABLE: &'static str;

    /// Whether `is_container` is a persisted column or derived on read
    const CONTAINER_FLAG: ContainerFlag;

    fn id(&self) -> Option<&NodeId>;
    fn set_id(&mut self, id: NodeId);

    fn title(&self) -> &str;
    fn set_title(&mut self, title: String);

    fn path(&self) -> &str;
    fn set_path(&mut self, path: String);

    fn parent(&self) -> Option<&NodeId>;
    fn set_parent(&mut self, parent: Option<NodeId>);

    fn is_container(&self) -> bool;
    fn set_is_container(&mut self, is_container: bool);

    /// Kind-specific payload persisted in the `properties` column
    fn properties(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Rebuild a node from a stored row
    fn from_record(record: NodeRecord) -> Self;

    /// `NEW` nodes have no identity yet; `PERSISTED` ones do
    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }
}

/// Resolve the container flag a node kind should expose for a stored row
pub fn container_flag_of<N: HierarchicalNode>(record: &NodeRecord) -> bool {
    match N::CONTAINER_FLAG {
        ContainerFlag::Stored => record.is_container,
        ContainerFlag::Derived => record.has_children,
    }
}

/// Check the static declarations of a node kind
///
/// Table names are interpolated into SQL, so only ASCII identifiers are
/// accepted.
pub fn validate_kind<N: HierarchicalNode>() -> Result<(), ValidationError> {
    let table = N::TABLE;
    let mut chars = table.chars();
    let valid_head = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_head || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidKind(format!(
            "table name '{}' is not a plain identifier",
            table
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Topic};

    #[derive(Clone)]
    struct BadKind;

    impl HierarchicalNode for BadKind {
        const TABLE: &'static str = "bad-kind; DROP";
        const CONTAINER_FLAG: ContainerFlag = ContainerFlag::Derived;

        fn id(&self) -> Option<&NodeId> {
            None
        }
        fn set_id(&mut self, _id: NodeId) {}
        fn title(&self) -> &str {
            ""
        }
        fn set_title(&mut self, _title: String) {}
        fn path(&self) -> &str {
            ""
        }
        fn set_path(&mut self, _path: String) {}
        fn parent(&self) -> Option<&NodeId> {
            None
        }
        fn set_parent(&mut self, _parent: Option<NodeId>) {}
        fn is_container(&self) -> bool {
            false
        }
        fn set_is_container(&mut self, _is_container: bool) {}
        fn from_record(_record: NodeRecord) -> Self {
            BadKind
        }
    }

    fn record(is_container: bool, has_children: bool) -> NodeRecord {
        NodeRecord {
            id: NodeId::generate(),
            title: "A".to_string(),
            path: "A".to_string(),
            parent_id: None,
            is_container,
            properties: serde_json::json!({}),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            has_children,
        }
    }

    #[test]
    fn test_validate_kind() {
        assert!(validate_kind::<Category>().is_ok());
        assert!(validate_kind::<Topic>().is_ok());
        assert!(matches!(
            validate_kind::<BadKind>(),
            Err(ValidationError::InvalidKind(_))
        ));
    }

    #[test]
    fn test_container_flag_resolution() {
        // Stored kinds trust the column, derived kinds trust child presence
        let stale = record(true, false);
        assert!(container_flag_of::<Category>(&stale));
        assert!(!container_flag_of::<Topic>(&stale));

        let parent = record(false, true);
        assert!(!container_flag_of::<Category>(&parent));
        assert!(container_flag_of::<Topic>(&parent));
    }

    #[test]
    fn test_node_id_generate_is_unique() {
        assert_ne!(NodeId::generate(), NodeId::generate());
        assert_eq!(NodeId::from("abc").as_str(), "abc");
    }
}
