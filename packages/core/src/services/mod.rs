//! Business Services
//!
//! - `HierarchicalTree` - materialized-path tree maintenance and queries
//!
//! Services coordinate between the row store and callers, implementing the
//! tree rules (path cascade, container flags, lock ordering) on top of the
//! storage primitives in [`crate::db`].

pub mod error;
pub mod hierarchy_service;

pub use error::TreeError;
pub use hierarchy_service::{HierarchicalTree, NodeCursor, SaveReport};
