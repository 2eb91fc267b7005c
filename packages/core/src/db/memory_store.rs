//! MemoryStore - In-Process Transactional Row Store
//!
//! Keeps committed rows in memory and gives every transaction:
//!
//! - **Row-level locks** from a shared [`RowLockTable`]; transactions on
//!   disjoint rows proceed in parallel
//! - **Staged writes**: inserts, field updates and deletes are buffered per
//!   transaction and applied atomically on commit
//! - **Read-your-writes**: reads through the transaction overlay its own
//!   pending writes on the committed rows
//! - **Path uniqueness** per table, checked against the final state at commit
//!
//! Reads on the store itself see committed state only and never take locks,
//! so a reader may observe one transaction's commit but never a partial one.

use crate::config::StoreConfig;
use crate::db::lock_table::{RowKey, RowLock, RowLockTable};
use crate::db::row_store::{NodeFilter, RowCursor, StoreTransaction, TransactionalRowStore};
use crate::db::StoreError;
use crate::models::{NewNodeRecord, NodeField, NodeId, NodeRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

type Table = BTreeMap<NodeId, NodeRecord>;

#[derive(Debug)]
struct MemoryInner {
    tables: RwLock<HashMap<String, Table>>,
    locks: RowLockTable,
    config: StoreConfig,
}

/// In-process row store with true row-level locking
///
/// Cloning is cheap and shares the same tables.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tables: RwLock::new(HashMap::new()),
                locks: RowLockTable::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

fn no_such_table(table: &str) -> StoreError {
    StoreError::sql_execution(format!("no such table: {}", table))
}

/// Fill in `has_children` for a complete view of one table
fn with_children(mut rows: Vec<NodeRecord>) -> Vec<NodeRecord> {
    let parents: HashSet<NodeId> = rows.iter().filter_map(|r| r.parent_id.clone()).collect();
    for row in rows.iter_mut() {
        row.has_children = parents.contains(&row.id);
    }
    rows
}

/// Reject two rows sharing a path
fn check_unique_paths(table: &str, rows: &Table) -> Result<(), StoreError> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(rows.len());
    for row in rows.values() {
        if !seen.insert(row.path.as_str()) {
            return Err(StoreError::unique_violation(table, row.path.clone()));
        }
    }
    Ok(())
}

#[async_trait]
impl TransactionalRowStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.tables.write().await;
        tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, StoreError> {
        Ok(MemoryTransaction {
            inner: self.inner.clone(),
            pending: BTreeMap::new(),
            locks: HashMap::new(),
            active: true,
        })
    }

    async fn get_by_id(&self, table: &str, id: &NodeId) -> Result<NodeRecord, StoreError> {
        let tables = self.inner.tables.read().await;
        let rows = tables.get(table).ok_or_else(|| no_such_table(table))?;
        let mut record = rows
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(table, id))?;
        record.has_children = rows
            .values()
            .any(|row| row.parent_id.as_ref() == Some(id));
        Ok(record)
    }

    async fn find(&self, table: &str, filter: &NodeFilter) -> Result<RowCursor, StoreError> {
        let tables = self.inner.tables.read().await;
        let rows = tables.get(table).ok_or_else(|| no_such_table(table))?;
        let view = with_children(rows.values().cloned().collect());
        Ok(RowCursor::new(filter.apply(view)))
    }

    async fn count(&self, table: &str, filter: &NodeFilter) -> Result<usize, StoreError> {
        Ok(self.find(table, filter).await?.len())
    }
}

#[derive(Debug)]
enum PendingWrite {
    Upsert(NodeRecord),
    Delete,
}

/// Transaction on a [`MemoryStore`]
///
/// Dropping an uncommitted transaction discards its staged writes and
/// releases its row locks.
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Arc<MemoryInner>,
    pending: BTreeMap<RowKey, PendingWrite>,
    locks: HashMap<RowKey, RowLock>,
    active: bool,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> Result<(), StoreError> {
        if self.active {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed)
        }
    }

    /// Committed rows of `table` overlaid with this transaction's writes
    async fn view(&self, table: &str) -> Result<Vec<NodeRecord>, StoreError> {
        let mut rows = {
            let tables = self.inner.tables.read().await;
            tables.get(table).ok_or_else(|| no_such_table(table))?.clone()
        };

        for (key, write) in self.pending.iter().filter(|(key, _)| key.table == table) {
            match write {
                PendingWrite::Upsert(record) => {
                    rows.insert(key.id.clone(), record.clone());
                }
                PendingWrite::Delete => {
                    rows.remove(&key.id);
                }
            }
        }

        Ok(with_children(rows.into_values().collect()))
    }

    async fn current_row(&self, table: &str, id: &NodeId) -> Result<NodeRecord, StoreError> {
        self.view(table)
            .await?
            .into_iter()
            .find(|row| &row.id == id)
            .ok_or_else(|| StoreError::not_found(table, id))
    }

    async fn lock_row(&mut self, key: RowKey) -> Result<(), StoreError> {
        if self.locks.contains_key(&key) {
            return Ok(());
        }
        let lock = self
            .inner
            .locks
            .acquire(key.clone(), self.inner.config.lock_timeout())
            .await?;
        self.locks.insert(key, lock);
        Ok(())
    }

    fn release(&mut self) {
        let released = self.locks.len();
        self.locks.clear();
        tracing::trace!("Released {} row lock(s)", released);
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_for_update(
        &mut self,
        table: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeRecord>, StoreError> {
        self.ensure_active()?;

        // Rows can start matching while we wait, so re-read until every
        // matching row is held
        loop {
            let matched = filter.apply(self.view(table).await?);
            let missing: BTreeSet<RowKey> = matched
                .iter()
                .map(|row| RowKey::new(table, &row.id))
                .filter(|key| !self.locks.contains_key(key))
                .collect();

            if missing.is_empty() {
                return Ok(matched);
            }

            for key in missing {
                self.lock_row(key).await?;
            }
        }
    }

    async fn find(
        &mut self,
        table: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeRecord>, StoreError> {
        self.ensure_active()?;
        Ok(filter.apply(self.view(table).await?))
    }

    async fn count(&mut self, table: &str, filter: &NodeFilter) -> Result<usize, StoreError> {
        Ok(StoreTransaction::find(self, table, filter).await?.len())
    }

    async fn insert(&mut self, table: &str, row: NewNodeRecord) -> Result<NodeRecord, StoreError> {
        self.ensure_active()?;
        {
            let tables = self.inner.tables.read().await;
            if !tables.contains_key(table) {
                return Err(no_such_table(table));
            }
        }

        let now = Utc::now();
        let record = NodeRecord {
            id: NodeId::generate(),
            title: row.title,
            path: row.path,
            parent_id: row.parent_id,
            is_container: row.is_container,
            properties: row.properties,
            created_at: now,
            modified_at: now,
            has_children: false,
        };

        let key = RowKey::new(table, &record.id);
        self.lock_row(key.clone()).await?;
        self.pending
            .insert(key, PendingWrite::Upsert(record.clone()));
        Ok(record)
    }

    async fn update_fields(
        &mut self,
        table: &str,
        record: &NodeRecord,
        fields: &[NodeField],
    ) -> Result<(), StoreError> {
        self.ensure_active()?;
        let key = RowKey::new(table, &record.id);
        self.lock_row(key.clone()).await?;

        let mut current = self.current_row(table, &record.id).await?;
        for field in fields {
            match field {
                NodeField::Title => current.title = record.title.clone(),
                NodeField::Path => current.path = record.path.clone(),
                NodeField::Parent => current.parent_id = record.parent_id.clone(),
                NodeField::IsContainer => current.is_container = record.is_container,
                NodeField::Properties => current.properties = record.properties.clone(),
            }
        }
        current.modified_at = Utc::now();

        self.pending.insert(key, PendingWrite::Upsert(current));
        Ok(())
    }

    async fn delete(&mut self, table: &str, id: &NodeId) -> Result<(), StoreError> {
        self.ensure_active()?;
        let key = RowKey::new(table, id);
        self.lock_row(key.clone()).await?;
        self.current_row(table, id).await?;
        self.pending.insert(key, PendingWrite::Delete);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_active()?;

        {
            let mut tables = self.inner.tables.write().await;

            let mut staged: HashMap<String, Table> = HashMap::new();
            for (key, write) in &self.pending {
                if !staged.contains_key(&key.table) {
                    let current = tables
                        .get(&key.table)
                        .ok_or_else(|| no_such_table(&key.table))?
                        .clone();
                    staged.insert(key.table.clone(), current);
                }
                if let Some(rows) = staged.get_mut(&key.table) {
                    match write {
                        PendingWrite::Upsert(record) => {
                            let mut record = record.clone();
                            record.has_children = false;
                            rows.insert(key.id.clone(), record);
                        }
                        PendingWrite::Delete => {
                            rows.remove(&key.id);
                        }
                    }
                }
            }

            for (table, rows) in &staged {
                check_unique_paths(table, rows)?;
            }

            for (table, rows) in staged {
                tables.insert(table, rows);
            }
        }

        tracing::debug!("Committed {} staged row write(s)", self.pending.len());
        self.pending.clear();
        self.active = false;
        self.release();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_active()?;
        self.pending.clear();
        self.active = false;
        self.release();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.active && !self.pending.is_empty() {
            tracing::debug!(
                "Discarding {} staged write(s) of an uncommitted transaction",
                self.pending.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    const TABLE: &str = "nodes";

    fn new_row(path: &str, parent_id: Option<NodeId>) -> NewNodeRecord {
        NewNodeRecord {
            title: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            parent_id,
            is_container: false,
            properties: json!({}),
        }
    }

    async fn store_with_timeout(ms: u64) -> MemoryStore {
        let store = MemoryStore::new(StoreConfig {
            lock_timeout_ms: ms,
            ..Default::default()
        });
        store.ensure_table(TABLE).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = store_with_timeout(100).await;

        let mut tx = store.begin_transaction().await.unwrap();
        let row = tx.insert(TABLE, new_row("A", None)).await.unwrap();

        // Visible inside, invisible outside
        assert_eq!(
            StoreTransaction::count(&mut tx, TABLE, &NodeFilter::new())
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.count(TABLE, &NodeFilter::new()).await.unwrap(), 0);

        tx.commit().await.unwrap();
        let stored = store.get_by_id(TABLE, &row.id).await.unwrap();
        assert_eq!(stored.path, "A");
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back_and_unlocks() {
        let store = store_with_timeout(50).await;

        let mut setup = store.begin_transaction().await.unwrap();
        let row = setup.insert(TABLE, new_row("A", None)).await.unwrap();
        setup.commit().await.unwrap();

        {
            let mut tx = store.begin_transaction().await.unwrap();
            let mut renamed = row.clone();
            renamed.path = "B".to_string();
            tx.update_fields(TABLE, &renamed, &[NodeField::Path])
                .await
                .unwrap();
        }

        assert_eq!(store.get_by_id(TABLE, &row.id).await.unwrap().path, "A");

        // Lock was released with the dropped transaction
        let mut tx = store.begin_transaction().await.unwrap();
        let locked = tx
            .lock_for_update(TABLE, &NodeFilter::by_id(row.id.clone()))
            .await
            .unwrap();
        assert_eq!(locked.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_slots_do_not_outlive_transactions() {
        let store = store_with_timeout(50).await;

        let mut setup = store.begin_transaction().await.unwrap();
        for i in 0..100 {
            setup
                .insert(TABLE, new_row(&format!("N{}", i), None))
                .await
                .unwrap();
        }
        setup.commit().await.unwrap();

        // Abandoned without commit or rollback
        for _ in 0..3 {
            let mut tx = store.begin_transaction().await.unwrap();
            let locked = tx.lock_for_update(TABLE, &NodeFilter::new()).await.unwrap();
            assert_eq!(locked.len(), 100);
            assert_eq!(store.inner.locks.tracked_rows(), 100);
        }
        assert_eq!(store.inner.locks.tracked_rows(), 0);

        let mut tx = store.begin_transaction().await.unwrap();
        tx.lock_for_update(TABLE, &NodeFilter::new()).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.inner.locks.tracked_rows(), 0);
    }

    #[tokio::test]
    async fn test_lock_for_update_blocks_other_transactions() {
        let store = store_with_timeout(30).await;

        let mut setup = store.begin_transaction().await.unwrap();
        let row = setup.insert(TABLE, new_row("A", None)).await.unwrap();
        setup.commit().await.unwrap();

        let mut first = store.begin_transaction().await.unwrap();
        first
            .lock_for_update(TABLE, &NodeFilter::by_id(row.id.clone()))
            .await
            .unwrap();

        let mut second = store.begin_transaction().await.unwrap();
        let result = second
            .lock_for_update(TABLE, &NodeFilter::by_id(row.id.clone()))
            .await;
        assert!(matches!(result, Err(StoreError::LockTimeout { .. })));

        first.rollback().await.unwrap();
        assert!(second
            .lock_for_update(TABLE, &NodeFilter::by_id(row.id.clone()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_waiter_sees_committed_value() {
        let store = store_with_timeout(2000).await;

        let mut setup = store.begin_transaction().await.unwrap();
        let row = setup.insert(TABLE, new_row("A", None)).await.unwrap();
        setup.commit().await.unwrap();

        let mut first = store.begin_transaction().await.unwrap();
        first
            .lock_for_update(TABLE, &NodeFilter::by_id(row.id.clone()))
            .await
            .unwrap();

        let waiter_store = store.clone();
        let waiter_id = row.id.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = waiter_store.begin_transaction().await.unwrap();
            let rows = tx
                .lock_for_update(TABLE, &NodeFilter::by_id(waiter_id))
                .await
                .unwrap();
            rows[0].path.clone()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut renamed = row.clone();
        renamed.path = "A2".to_string();
        first
            .update_fields(TABLE, &renamed, &[NodeField::Path])
            .await
            .unwrap();
        first.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), "A2");
    }

    #[tokio::test]
    async fn test_commit_rejects_duplicate_paths() {
        let store = store_with_timeout(100).await;

        let mut tx = store.begin_transaction().await.unwrap();
        tx.insert(TABLE, new_row("A", None)).await.unwrap();
        tx.insert(TABLE, new_row("A", None)).await.unwrap();
        let result = tx.commit().await;
        assert!(matches!(result, Err(StoreError::UniqueViolation { .. })));
        tx.rollback().await.unwrap();

        assert_eq!(store.count(TABLE, &NodeFilter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_has_children_is_computed_on_read() {
        let store = store_with_timeout(100).await;

        let mut tx = store.begin_transaction().await.unwrap();
        let parent = tx.insert(TABLE, new_row("A", None)).await.unwrap();
        tx.insert(TABLE, new_row("A/B", Some(parent.id.clone())))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(store.get_by_id(TABLE, &parent.id).await.unwrap().has_children);
        let leaf = store
            .find(TABLE, &NodeFilter::new().with_path("A/B"))
            .await
            .unwrap()
            .next()
            .unwrap();
        assert!(!leaf.has_children);
    }

    #[tokio::test]
    async fn test_closed_transaction_rejects_use() {
        let store = store_with_timeout(100).await;
        let mut tx = store.begin_transaction().await.unwrap();
        tx.commit().await.unwrap();
        assert!(matches!(
            tx.commit().await,
            Err(StoreError::TransactionClosed)
        ));
        assert!(matches!(
            tx.insert(TABLE, new_row("A", None)).await,
            Err(StoreError::TransactionClosed)
        ));
    }

    #[tokio::test]
    async fn test_missing_table_and_row() {
        let store = MemoryStore::default();
        assert!(store.find("absent", &NodeFilter::new()).await.is_err());

        store.ensure_table(TABLE).await.unwrap();
        let missing = store.get_by_id(TABLE, &NodeId::from("nope")).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }
}
