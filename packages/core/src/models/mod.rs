//! Data Models
//!
//! This module contains the core data structures of the hierarchy store:
//!
//! - `NodeRecord` - Storage row shared by every node kind
//! - `HierarchicalNode` - Capability trait implemented per node kind
//! - `path` - Materialized path encoding and decoding
//! - Concrete kinds: `Category` (stored container flag), `Topic` (derived)
//!
//! Kind-specific data is kept in the `properties` JSON column of the kind's
//! table, so every kind shares one row schema.

mod category_node;
mod node;
pub mod path;
mod topic_node;

pub use category_node::Category;
pub use node::{
    container_flag_of, validate_kind, ContainerFlag, HierarchicalNode, NodeField, NodeId,
    NodeRecord, NewNodeRecord, ValidationError,
};
pub use topic_node::Topic;
