//! Row Lock Table
//!
//! Transaction-scoped exclusive locks keyed by `(table, row id)`. A row lock
//! is a claim on one row only, so transactions touching disjoint row sets
//! never wait on each other; there is no table or global lock.
//!
//! Waiting is bounded: acquisition gives up after the configured timeout and
//! reports `StoreError::LockTimeout`. That also breaks lock-order deadlocks
//! between two transactions, at the cost of aborting one of them.

use crate::db::StoreError;
use crate::models::NodeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SlotMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slots = Arc<SlotMutex<HashMap<RowKey, Arc<Mutex<()>>>>>;

/// Identity of a lockable row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub table: String,
    pub id: NodeId,
}

impl RowKey {
    pub fn new(table: &str, id: &NodeId) -> Self {
        Self {
            table: table.to_string(),
            id: id.clone(),
        }
    }
}

/// A held row lock; dropping it releases the row and its slot
#[derive(Debug)]
pub struct RowLock {
    key: RowKey,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots,
}

impl RowLock {
    pub fn key(&self) -> &RowKey {
        &self.key
    }
}

impl Drop for RowLock {
    fn drop(&mut self) {
        // Unlock before checking whether anyone else still wants the slot
        self.guard.take();
        forget_if_unused(&self.slots, &self.key);
    }
}

/// The slot map is only held for short, non-async sections, so a poisoned
/// lock still guards a consistent map
fn lock_slots(slots: &Slots) -> MutexGuard<'_, HashMap<RowKey, Arc<Mutex<()>>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forget_if_unused(slots: &Slots, key: &RowKey) {
    let mut slots = lock_slots(slots);
    let unused = slots
        .get(key)
        .map(|slot| Arc::strong_count(slot) == 1)
        .unwrap_or(false);
    if unused {
        slots.remove(key);
    }
}

/// Shared registry of per-row mutexes
///
/// A slot exists only while some transaction holds or waits for its row.
#[derive(Debug, Default)]
pub struct RowLockTable {
    slots: Slots,
}

impl RowLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of a row
    pub async fn acquire(&self, key: RowKey, timeout: Duration) -> Result<RowLock, StoreError> {
        let slot = lock_slots(&self.slots).entry(key.clone()).or_default().clone();

        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(RowLock {
                key,
                guard: Some(guard),
                slots: self.slots.clone(),
            }),
            Err(_) => {
                forget_if_unused(&self.slots, &key);
                tracing::warn!(
                    "Lock wait on {}/{} exceeded {:?}",
                    key.table,
                    key.id,
                    timeout
                );
                Err(StoreError::lock_timeout(
                    key.table,
                    key.id.to_string(),
                    timeout,
                ))
            }
        }
    }

    /// Number of rows with a registered slot
    pub fn tracked_rows(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}
