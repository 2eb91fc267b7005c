//! PathTree Core - Materialized Path Hierarchies
//!
//! This crate keeps hierarchical data in flat tables: every row stores the
//! full `/`-joined title path of its ancestor chain, so ancestor, root and
//! subtree lookups are single indexed queries instead of recursive walks.
//!
//! # Architecture
//!
//! - **Materialized path**: `path` is the source of truth for ancestry queries
//! - **Transactional cascade**: renames and moves rewrite every descendant
//!   path in the same transaction as the node itself
//! - **Row locks**: structural saves lock parent, node and descendants, so
//!   edits to disjoint subtrees proceed concurrently
//! - **Pluggable storage**: any [`db::TransactionalRowStore`] works; the crate
//!   ships an in-process store and a libsql store
//!
//! # Modules
//!
//! - [`models`] - Node kinds, row model and path encoding
//! - [`db`] - Storage traits, in-memory and libsql backends
//! - [`services`] - The `HierarchicalTree` service
//! - [`config`] - Store and tree configuration

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::{DeletePolicy, StoreConfig, TreeConfig};
pub use db::{MemoryStore, StoreError, TransactionalRowStore, TursoStore};
pub use models::*;
pub use services::*;
