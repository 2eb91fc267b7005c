//! Database Layer
//!
//! This module provides the transactional row stores the hierarchy service
//! runs on:
//!
//! - `TransactionalRowStore` / `StoreTransaction` - the storage abstraction
//! - `NodeFilter` / `RowCursor` - predicate queries and their cursors
//! - `RowLockTable` - transaction-scoped exclusive row locks
//! - `MemoryStore` - in-process engine with true row-level locking
//! - `TursoStore` - embedded libsql/SQLite engine
//!
//! # Architecture
//!
//! Every node kind is stored in its own table sharing one row schema:
//! `id`, `title`, `path` (unique, indexed), `parent_id`, `is_container`,
//! `properties` (JSON) and timestamps. Reads outside a transaction are
//! unlocked and see committed state; all mutation happens inside a
//! transaction under row locks.

mod error;
pub mod lock_table;
mod memory_store;
mod row_store;
mod turso_store;

pub use error::StoreError;
pub use lock_table::{RowKey, RowLock, RowLockTable};
pub use memory_store::{MemoryStore, MemoryTransaction};
pub use row_store::{NodeFilter, OrderBy, RowCursor, StoreTransaction, TransactionalRowStore};
pub use turso_store::{TursoStore, TursoTransaction};
