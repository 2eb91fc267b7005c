//! Hierarchy Service - Materialized Path Tree
//!
//! `HierarchicalTree` keeps a flat table of nodes organized as a tree where
//! every row stores its full ancestor path:
//!
//! - Structural saves (create, rename, move) run in one store transaction
//! - Renames and moves cascade the new prefix to every descendant path
//! - Parents are marked as containers when they gain a child and cleared when
//!   they lose their last one (for kinds with a stored flag)
//! - Ancestor, root and subtree queries are single indexed lookups on `path`
//!
//! # Concurrency
//!
//! Parent rows are locked first (the old and new parent of a move, ordered by
//! path so ancestors come first), then the node itself, then its
//! descendants. Two saves touching disjoint subtrees never wait on each other;
//! two saves whose row sets overlap are serialized by the store's row locks,
//! and a wait that exceeds the store's lock timeout aborts the later one with
//! [`TreeError::ConcurrencyTimeout`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use pathtree_core::config::TreeConfig;
//! use pathtree_core::db::MemoryStore;
//! use pathtree_core::models::{Category, HierarchicalNode};
//! use pathtree_core::services::HierarchicalTree;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), pathtree_core::services::TreeError> {
//! let store = Arc::new(MemoryStore::default());
//! let tree: HierarchicalTree<MemoryStore, Category> =
//!     HierarchicalTree::new(store, TreeConfig::default()).await?;
//!
//! let mut fruit = Category::new("Fruit");
//! tree.save(&mut fruit, false).await?;
//!
//! let mut apple = Category::new("Apple").with_parent(fruit.id().cloned().unwrap());
//! tree.save(&mut apple, false).await?;
//! assert_eq!(apple.path(), "Fruit/Apple");
//! # Ok(())
//! # }
//! ```

use crate::config::{DeletePolicy, TreeConfig};
use crate::db::{NodeFilter, OrderBy, RowCursor, StoreTransaction, TransactionalRowStore};
use crate::models::path;
use crate::models::{
    container_flag_of, validate_kind, HierarchicalNode, NewNodeRecord, NodeField, NodeId,
    NodeRecord, ValidationError,
};
use crate::services::error::TreeError;
use std::marker::PhantomData;
use std::sync::Arc;

/// Summary of a committed structural save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub id: NodeId,
    pub path: String,
    /// Committed path before this save (`None` for a newly created node)
    pub previous_path: Option<String>,
    /// Number of descendant rows whose path was rewritten
    pub descendants_rewritten: usize,
}

/// Lazily mapped query results
///
/// Finite and single-pass, like the underlying [`RowCursor`].
pub struct NodeCursor<N: HierarchicalNode> {
    rows: RowCursor,
    _kind: PhantomData<fn() -> N>,
}

impl<N: HierarchicalNode> NodeCursor<N> {
    fn new(rows: RowCursor) -> Self {
        Self {
            rows,
            _kind: PhantomData,
        }
    }
}

impl<N: HierarchicalNode> Iterator for NodeCursor<N> {
    type Item = N;

    fn next(&mut self) -> Option<N> {
        self.rows.next().map(node_from_record::<N>)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl<N: HierarchicalNode> ExactSizeIterator for NodeCursor<N> {}

/// Build a node from a row, resolving the container flag for its kind
fn node_from_record<N: HierarchicalNode>(record: NodeRecord) -> N {
    let is_container = container_flag_of::<N>(&record);
    let mut node = N::from_record(record);
    node.set_is_container(is_container);
    node
}

/// Materialized-path tree over one node kind
pub struct HierarchicalTree<S: TransactionalRowStore, N: HierarchicalNode> {
    store: Arc<S>,
    config: TreeConfig,
    _kind: PhantomData<fn() -> N>,
}

impl<S, N> HierarchicalTree<S, N>
where
    S: TransactionalRowStore,
    N: HierarchicalNode,
{
    /// Register node kind `N` with `store`
    ///
    /// Validates the kind's static declarations and the configuration, then
    /// creates the kind's table if needed.
    pub async fn new(store: Arc<S>, config: TreeConfig) -> Result<Self, TreeError> {
        validate_kind::<N>()?;
        config.validate().map_err(TreeError::Configuration)?;
        store.ensure_table(N::TABLE).await?;

        tracing::debug!(
            "Registered hierarchy for '{}' ({:?} container flag)",
            N::TABLE,
            N::CONTAINER_FLAG
        );

        Ok(Self {
            store,
            config,
            _kind: PhantomData,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    // ========================================================================
    // Path Derivation
    // ========================================================================

    /// Compute the path `node` should have
    ///
    /// With `recheck_parent`, the parent is reloaded from the store and its
    /// stored path is joined with the node's title. Without it, the node's own
    /// stored path is trusted for everything above the leaf, which avoids
    /// walking the ancestor chain on a plain rename.
    pub async fn get_path(&self, node: &N, recheck_parent: bool) -> Result<String, TreeError> {
        let title = path::normalize_title(node.title())?;

        if recheck_parent {
            return match node.parent() {
                Some(parent_id) => {
                    let parent = self.store.get_by_id(N::TABLE, parent_id).await?;
                    let parent_path = path::derive_from_stored(&parent.path, &parent.title);
                    Ok(path::join(&parent_path, &title))
                }
                None => Ok(title),
            };
        }

        Ok(path::derive_from_stored(node.path(), &title))
    }

    // ========================================================================
    // Structural Saves
    // ========================================================================

    /// Persist a create, rename or move in its own transaction
    ///
    /// On success `node` carries its assigned id, normalized title and new
    /// path. On failure nothing is written and `node` is left untouched.
    /// A change of parent always recomputes the path from the new parent,
    /// whatever `recheck_parent` says.
    pub async fn save(&self, node: &mut N, recheck_parent: bool) -> Result<SaveReport, TreeError> {
        let mut tx = self.store.begin_transaction().await?;
        let mut draft = node.clone();

        let report = match self.save_in(&mut tx, &mut draft, recheck_parent).await {
            Ok(report) => report,
            Err(e) => {
                rollback_quietly(&mut tx, "save").await;
                tracing::warn!("Rolled back save of {} '{}': {}", N::TABLE, node.title(), e);
                return Err(e.aborted("save"));
            }
        };

        if let Err(e) = tx.commit().await {
            rollback_quietly(&mut tx, "save").await;
            return Err(TreeError::from(e).aborted("commit"));
        }

        match &report.previous_path {
            Some(previous) if previous != &report.path => tracing::info!(
                "Moved {} '{}' -> '{}' ({} descendants rewritten)",
                N::TABLE,
                previous,
                report.path,
                report.descendants_rewritten
            ),
            Some(_) => tracing::debug!("Saved {} '{}'", N::TABLE, report.path),
            None => tracing::info!("Created {} '{}'", N::TABLE, report.path),
        }

        *node = draft;
        Ok(report)
    }

    /// Perform a structural save inside a caller-owned transaction
    ///
    /// The caller decides when to commit; nothing here commits or rolls back.
    /// `node` is updated with the values that were written.
    pub async fn save_in(
        &self,
        tx: &mut S::Transaction,
        node: &mut N,
        recheck_parent: bool,
    ) -> Result<SaveReport, TreeError> {
        let title = path::normalize_title(node.title())?;
        let parent_id = node.parent().cloned();

        if let (Some(id), Some(parent)) = (node.id(), parent_id.as_ref()) {
            if id == parent {
                return Err(ValidationError::CircularParent {
                    node_id: id.to_string(),
                    parent_id: parent.to_string(),
                }
                .into());
            }
        }

        // Where the node sits now, read without taking its lock
        let snapshot = match node.id() {
            Some(id) => Some(self.read_row(tx, id).await?),
            None => None,
        };
        let old_parent_id = snapshot.and_then(|row| row.parent_id);

        // Both parents before self, so a move and a rename of either parent
        // queue on the same row instead of each holding what the other needs
        let mut parent_ids: Vec<NodeId> = parent_id.iter().cloned().collect();
        if let Some(old) = &old_parent_id {
            if Some(old) != parent_id.as_ref() {
                parent_ids.push(old.clone());
            }
        }
        self.lock_parents(tx, parent_ids).await?;

        let parent = match &parent_id {
            Some(parent_id) => Some(self.mark_container(tx, parent_id).await?),
            None => None,
        };

        let current = match node.id() {
            Some(id) => Some(self.lock_row(tx, id).await?),
            None => None,
        };

        if let Some(row) = &current {
            if row.parent_id != old_parent_id {
                // Moved by another writer while we waited, so its real parent
                // is only locked when its flag is re-evaluated below
                tracing::debug!(
                    "'{}' changed parent while waiting for its lock",
                    row.path
                );
            }
        }

        let parent_changed = current
            .as_ref()
            .map(|row| row.parent_id != parent_id)
            .unwrap_or(false);

        let new_path = match &current {
            Some(row) if !recheck_parent && !parent_changed => {
                path::derive_from_stored(&row.path, &title)
            }
            _ => match &parent {
                Some(parent) => path::join(&parent.path, &title),
                None => title.clone(),
            },
        };

        let depth = path::depth(&new_path);
        if depth > self.config.max_depth {
            return Err(ValidationError::PathTooDeep {
                depth,
                max: self.config.max_depth,
            }
            .into());
        }

        let report = match current {
            Some(mut row) => {
                if let Some(parent) = &parent {
                    if path::is_ancestor_path(&row.path, &parent.path) {
                        return Err(ValidationError::CircularParent {
                            node_id: row.id.to_string(),
                            parent_id: parent.id.to_string(),
                        }
                        .into());
                    }
                }

                let previous_path = row.path.clone();
                let descendants_rewritten = self
                    .rewrite_descendant_paths(tx, &previous_path, &new_path)
                    .await?;

                if parent_changed {
                    if let Some(old_parent) = row.parent_id.clone() {
                        self.release_container(tx, &old_parent, &row.id).await?;
                    }
                }

                row.title = title.clone();
                row.path = new_path.clone();
                row.parent_id = parent_id;
                row.properties = node.properties();
                tx.update_fields(
                    N::TABLE,
                    &row,
                    &[
                        NodeField::Title,
                        NodeField::Path,
                        NodeField::Parent,
                        NodeField::Properties,
                    ],
                )
                .await?;

                node.set_is_container(container_flag_of::<N>(&row));

                SaveReport {
                    id: row.id,
                    path: new_path.clone(),
                    previous_path: Some(previous_path),
                    descendants_rewritten,
                }
            }
            None => {
                let inserted = tx
                    .insert(
                        N::TABLE,
                        NewNodeRecord {
                            title: title.clone(),
                            path: new_path.clone(),
                            parent_id,
                            is_container: false,
                            properties: node.properties(),
                        },
                    )
                    .await?;

                node.set_id(inserted.id.clone());
                node.set_is_container(false);

                SaveReport {
                    id: inserted.id,
                    path: new_path.clone(),
                    previous_path: None,
                    descendants_rewritten: 0,
                }
            }
        };

        node.set_title(title);
        node.set_path(new_path);
        Ok(report)
    }

    /// Rewrite every path under `old_path` to sit under `new_path`
    ///
    /// Locks all affected rows first. Each descendant keeps its relative
    /// sub-path; only the exact `old_path/` prefix is replaced. Returns the
    /// number of rows rewritten.
    pub async fn rewrite_descendant_paths(
        &self,
        tx: &mut S::Transaction,
        old_path: &str,
        new_path: &str,
    ) -> Result<usize, TreeError> {
        if old_path == new_path {
            return Ok(0);
        }

        let filter = NodeFilter::new().with_path_prefix(path::descendant_prefix(old_path));
        let descendants = tx.lock_for_update(N::TABLE, &filter).await?;

        let mut rewritten = 0;
        for mut row in descendants {
            let Some(rebased) = path::rebase(&row.path, old_path, new_path) else {
                continue;
            };

            let depth = path::depth(&rebased);
            if depth > self.config.max_depth {
                return Err(ValidationError::PathTooDeep {
                    depth,
                    max: self.config.max_depth,
                }
                .into());
            }

            tracing::trace!("Rebasing '{}' -> '{}'", row.path, rebased);
            row.path = rebased;
            tx.update_fields(N::TABLE, &row, &[NodeField::Path]).await?;
            rewritten += 1;
        }

        Ok(rewritten)
    }

    /// Lock the parent row and flag it as a container
    ///
    /// A missing parent is a validation failure, not a lookup miss. Writing
    /// the flag is skipped when it is already set, so re-saving a child leaves
    /// the parent row untouched.
    async fn mark_container(
        &self,
        tx: &mut S::Transaction,
        parent_id: &NodeId,
    ) -> Result<NodeRecord, TreeError> {
        let mut parent = tx
            .lock_for_update(N::TABLE, &NodeFilter::by_id(parent_id.clone()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ValidationError::InvalidParent(format!(
                    "{} does not exist in {}",
                    parent_id,
                    N::TABLE
                ))
            })?;

        if N::CONTAINER_FLAG.is_stored() && !parent.is_container {
            parent.is_container = true;
            tx.update_fields(N::TABLE, &parent, &[NodeField::IsContainer])
                .await?;
        }

        Ok(parent)
    }

    /// Clear the container flag of a former parent that has no children left
    ///
    /// `departing` is the child being moved away or deleted; it is excluded
    /// from the count in case its own row change is not written yet.
    async fn release_container(
        &self,
        tx: &mut S::Transaction,
        parent_id: &NodeId,
        departing: &NodeId,
    ) -> Result<(), TreeError> {
        if !N::CONTAINER_FLAG.is_stored() {
            return Ok(());
        }

        let Some(mut parent) = tx
            .lock_for_update(N::TABLE, &NodeFilter::by_id(parent_id.clone()))
            .await?
            .into_iter()
            .next()
        else {
            return Ok(());
        };

        let remaining = tx
            .count(
                N::TABLE,
                &NodeFilter::new()
                    .with_parent_id(parent_id.clone())
                    .with_exclude_id(departing.clone()),
            )
            .await?;

        if remaining == 0 && parent.is_container {
            tracing::debug!("'{}' lost its last child", parent.path);
            parent.is_container = false;
            tx.update_fields(N::TABLE, &parent, &[NodeField::IsContainer])
                .await?;
        }

        Ok(())
    }

    /// Lock parent rows ancestors first
    ///
    /// Rows are ordered by their current path, then by id, so every writer
    /// that needs two of them takes them in the same order. Ids that no
    /// longer exist are skipped; `mark_container` reports a missing new
    /// parent.
    async fn lock_parents(
        &self,
        tx: &mut S::Transaction,
        ids: Vec<NodeId>,
    ) -> Result<(), TreeError> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let found = tx.find(N::TABLE, &NodeFilter::by_id(id)).await?;
            rows.extend(found);
        }
        rows.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));

        for row in rows {
            tx.lock_for_update(N::TABLE, &NodeFilter::by_id(row.id))
                .await?;
        }
        Ok(())
    }

    /// Current row as this transaction sees it, without locking it
    async fn read_row(
        &self,
        tx: &mut S::Transaction,
        id: &NodeId,
    ) -> Result<NodeRecord, TreeError> {
        tx.find(N::TABLE, &NodeFilter::by_id(id.clone()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TreeError::not_found(N::TABLE, id.to_string()))
    }

    async fn lock_row(
        &self,
        tx: &mut S::Transaction,
        id: &NodeId,
    ) -> Result<NodeRecord, TreeError> {
        tx.lock_for_update(N::TABLE, &NodeFilter::by_id(id.clone()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TreeError::not_found(N::TABLE, id.to_string()))
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Delete a node according to the configured [`DeletePolicy`]
    ///
    /// Returns the number of rows removed (the node plus any cascaded
    /// descendants). The former parent's container flag is re-evaluated.
    pub async fn delete(&self, node: &N) -> Result<usize, TreeError> {
        let id = node
            .id()
            .cloned()
            .ok_or_else(|| ValidationError::MissingField("id".to_string()))?;

        let mut tx = self.store.begin_transaction().await?;
        match self.delete_in(&mut tx, &id).await {
            Ok(removed) => {
                if let Err(e) = tx.commit().await {
                    rollback_quietly(&mut tx, "delete").await;
                    return Err(TreeError::from(e).aborted("commit"));
                }
                tracing::info!("Deleted {} {} ({} rows)", N::TABLE, id, removed);
                Ok(removed)
            }
            Err(e) => {
                rollback_quietly(&mut tx, "delete").await;
                tracing::warn!("Rolled back delete of {} {}: {}", N::TABLE, id, e);
                Err(e.aborted("delete"))
            }
        }
    }

    async fn delete_in(&self, tx: &mut S::Transaction, id: &NodeId) -> Result<usize, TreeError> {
        // Lock the parent ahead of the node, as saves do
        let snapshot = self.read_row(tx, id).await?;
        if let Some(parent_id) = snapshot.parent_id {
            self.lock_parents(tx, vec![parent_id]).await?;
        }

        let row = self.lock_row(tx, id).await?;
        let descendants = tx
            .lock_for_update(
                N::TABLE,
                &NodeFilter::new()
                    .with_path_prefix(path::descendant_prefix(&row.path))
                    .with_order_by(OrderBy::PathDesc),
            )
            .await?;

        if !descendants.is_empty() && self.config.delete_policy == DeletePolicy::Restrict {
            return Err(TreeError::HasDescendants {
                id: id.to_string(),
                count: descendants.len(),
            });
        }

        // Deepest first (descending path order) so no row outlives its parent
        for record in &descendants {
            tx.delete(N::TABLE, &record.id).await?;
        }
        tx.delete(N::TABLE, id).await?;

        if let Some(parent_id) = &row.parent_id {
            self.release_container(tx, parent_id, id).await?;
        }

        Ok(descendants.len() + 1)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Load a node by id
    pub async fn get(&self, id: &NodeId) -> Result<N, TreeError> {
        let record = self.store.get_by_id(N::TABLE, id).await?;
        Ok(node_from_record::<N>(record))
    }

    /// Load a node by its exact path
    pub async fn get_by_path(&self, node_path: &str) -> Result<N, TreeError> {
        self.store
            .find(N::TABLE, &NodeFilter::new().with_path(node_path).with_limit(1))
            .await?
            .next()
            .map(node_from_record::<N>)
            .ok_or_else(|| TreeError::not_found(N::TABLE, node_path))
    }

    /// Every proper ancestor of `node`, root first
    ///
    /// Found by exact match on the ancestor paths encoded in the node's own
    /// path, so a sibling whose path merely shares a prefix is never returned.
    pub async fn get_all_parents(&self, node: &N) -> Result<Vec<N>, TreeError> {
        let mut ancestors = path::ancestor_paths(node.path());

        let filter = match ancestors.len() {
            0 => return Ok(Vec::new()),
            1 => NodeFilter::new().with_path(ancestors.remove(0)),
            _ => NodeFilter::new()
                .with_paths(ancestors)
                .with_order_by(OrderBy::PathAsc),
        };

        let rows = self.store.find(N::TABLE, &filter).await?;
        Ok(NodeCursor::<N>::new(rows).collect())
    }

    /// The root of the tree `node` belongs to
    ///
    /// Returns `None` when no stored row matches the first path segment.
    pub async fn get_root(&self, node: &N) -> Result<Option<N>, TreeError> {
        let Some(segment) = path::root_segment(node.path()) else {
            return Ok(None);
        };

        let filter = NodeFilter::new()
            .with_path(segment)
            .with_title(segment)
            .with_limit(1);
        let mut rows = self.store.find(N::TABLE, &filter).await?;
        Ok(rows.next().map(node_from_record::<N>))
    }

    /// Every descendant of `node`, optionally filtered by container flag
    ///
    /// The flag filter only applies to kinds with a stored flag; for derived
    /// kinds all descendants are returned. The node itself is never included.
    pub async fn get_all_nested(
        &self,
        node: &N,
        is_container: Option<bool>,
    ) -> Result<NodeCursor<N>, TreeError> {
        let mut filter = NodeFilter::new()
            .with_path_prefix(path::descendant_prefix(node.path()))
            .with_order_by(OrderBy::PathAsc);

        if let Some(flag) = is_container {
            if N::CONTAINER_FLAG.is_stored() {
                filter = filter.with_is_container(flag);
            }
        }

        let rows = self.store.find(N::TABLE, &filter).await?;
        Ok(NodeCursor::new(rows))
    }

    /// Descendants that are containers
    pub async fn get_nested_containers(&self, node: &N) -> Result<NodeCursor<N>, TreeError> {
        self.get_all_nested(node, Some(true)).await
    }

    /// Descendants that are items (non-containers)
    pub async fn get_nested_items(&self, node: &N) -> Result<NodeCursor<N>, TreeError> {
        self.get_all_nested(node, Some(false)).await
    }

    /// Every root node, ordered by path
    pub async fn roots(&self) -> Result<Vec<N>, TreeError> {
        let filter = NodeFilter::new()
            .with_is_root(true)
            .with_order_by(OrderBy::PathAsc);
        let rows = self.store.find(N::TABLE, &filter).await?;
        Ok(NodeCursor::<N>::new(rows).collect())
    }

    /// Direct children of `node`, ordered by path
    pub async fn children_of(&self, node: &N) -> Result<Vec<N>, TreeError> {
        let Some(id) = node.id() else {
            return Ok(Vec::new());
        };

        let filter = NodeFilter::new()
            .with_parent_id(id.clone())
            .with_order_by(OrderBy::PathAsc);
        let rows = self.store.find(N::TABLE, &filter).await?;
        Ok(NodeCursor::<N>::new(rows).collect())
    }
}

async fn rollback_quietly<T: StoreTransaction>(tx: &mut T, operation: &str) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!("Rollback after failed {} also failed: {}", operation, e);
    }
}

#[cfg(test)]
#[path = "hierarchy_service_test.rs"]
mod hierarchy_service_test;
