//! Concurrency Tests for Structural Saves
//!
//! Exercises the row-lock protocol of `HierarchicalTree` against the
//! in-process store:
//! - saves in disjoint subtrees proceed while another transaction is open
//! - saves whose row sets overlap are serialized and see committed state
//! - a move waits on its old parent, so it never deadlocks with a rename
//!   of that parent
//! - waits beyond the lock timeout surface as `ConcurrencyTimeout`

use anyhow::Result;
use pathtree_core::config::{StoreConfig, TreeConfig};
use pathtree_core::db::{MemoryStore, NodeFilter, StoreTransaction, TransactionalRowStore};
use pathtree_core::models::{Category, HierarchicalNode, NodeId};
use pathtree_core::services::{HierarchicalTree, TreeError};
use std::sync::Arc;
use std::time::Duration;

type CategoryTree = HierarchicalTree<MemoryStore, Category>;

async fn setup(lock_timeout_ms: u64) -> Result<(Arc<CategoryTree>, Arc<MemoryStore>)> {
    let store = Arc::new(MemoryStore::new(StoreConfig {
        lock_timeout_ms,
        ..Default::default()
    }));
    let tree = HierarchicalTree::new(store.clone(), TreeConfig::default()).await?;
    Ok((Arc::new(tree), store))
}

async fn create(tree: &CategoryTree, title: &str, parent: Option<&Category>) -> Result<Category> {
    let mut node = Category::new(title);
    if let Some(parent) = parent {
        node.set_parent(parent.id().cloned());
    }
    tree.save(&mut node, false).await?;
    Ok(node)
}

fn id_of(node: &Category) -> NodeId {
    node.id().cloned().unwrap()
}

async fn all_paths(store: &MemoryStore) -> Result<Vec<String>> {
    let mut paths: Vec<String> = store
        .find(Category::TABLE, &NodeFilter::new())
        .await?
        .map(|row| row.path)
        .collect();
    paths.sort();
    Ok(paths)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_subtrees_do_not_block() -> Result<()> {
    let (tree, store) = setup(2_000).await?;
    let mut a = create(&tree, "A", None).await?;
    create(&tree, "Apple", Some(&a)).await?;
    let mut b = create(&tree, "B", None).await?;
    create(&tree, "Banana", Some(&b)).await?;

    // Hold the A subtree locked in an open transaction
    let mut tx = store.begin_transaction().await?;
    a.set_title("A2".to_string());
    tree.save_in(&mut tx, &mut a, false).await?;

    // A rename in the B subtree completes while A's transaction is still open
    let other = tree.clone();
    let rename_b = tokio::spawn(async move {
        b.set_title("B2".to_string());
        other.save(&mut b, false).await.map(|_| b)
    });
    let b = tokio::time::timeout(Duration::from_millis(500), rename_b).await???;
    assert_eq!(b.path(), "B2");

    tx.commit().await?;

    assert_eq!(
        all_paths(&store).await?,
        vec!["A2", "A2/Apple", "B2", "B2/Banana"]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_saves_are_serialized() -> Result<()> {
    let (tree, store) = setup(5_000).await?;
    let mut a = create(&tree, "A", None).await?;
    let x = create(&tree, "X", Some(&a)).await?;
    let leaf = create(&tree, "Leaf", Some(&x)).await?;
    let b = create(&tree, "B", None).await?;

    // Rename A without committing; X and Leaf are now locked
    let mut tx = store.begin_transaction().await?;
    a.set_title("A2".to_string());
    tree.save_in(&mut tx, &mut a, false).await?;

    // Moving X under B has to wait for the rename
    let other = tree.clone();
    let b_id = id_of(&b);
    let mut moving = x.clone();
    let move_x = tokio::spawn(async move {
        moving.set_parent(Some(b_id));
        other.save(&mut moving, false).await.map(|_| moving)
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!move_x.is_finished());

    tx.commit().await?;
    let moved = move_x.await??;

    // The move started from the committed rename, so no path is lost
    assert_eq!(moved.path(), "B/X");
    assert_eq!(tree.get(&id_of(&leaf)).await?.path(), "B/X/Leaf");
    assert_eq!(all_paths(&store).await?, vec!["A2", "B", "B/X", "B/X/Leaf"]);

    assert!(!tree.get(&id_of(&a)).await?.is_container());
    assert!(tree.get(&id_of(&b)).await?.is_container());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_move_queues_behind_rename_of_old_parent() -> Result<()> {
    let (tree, store) = setup(1_000).await?;
    let mut a = create(&tree, "A", None).await?;
    let x = create(&tree, "X", Some(&a)).await?;
    let b = create(&tree, "B", None).await?;

    // The rename of A has claimed A but not yet its descendants
    let mut tx = store.begin_transaction().await?;
    tx.lock_for_update(Category::TABLE, &NodeFilter::by_id(id_of(&a)))
        .await?;

    let other = tree.clone();
    let b_id = id_of(&b);
    let mut moving = x.clone();
    let move_x = tokio::spawn(async move {
        moving.set_parent(Some(b_id));
        other.save(&mut moving, false).await.map(|_| moving)
    });

    // The move waits on its old parent before touching X
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!move_x.is_finished());

    // So the rename can still lock X and rewrite it
    a.set_title("A2".to_string());
    let report = tree.save_in(&mut tx, &mut a, false).await?;
    assert_eq!(report.descendants_rewritten, 1);
    tx.commit().await?;

    let moved = move_x.await??;
    assert_eq!(moved.path(), "B/X");
    assert_eq!(all_paths(&store).await?, vec!["A2", "B", "B/X"]);

    assert!(!tree.get(&id_of(&a)).await?.is_container());
    assert!(tree.get(&id_of(&b)).await?.is_container());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_moves_in_opposite_directions_both_commit() -> Result<()> {
    let (tree, store) = setup(2_000).await?;
    let a = create(&tree, "A", None).await?;
    let b = create(&tree, "B", None).await?;
    let x = create(&tree, "X", Some(&a)).await?;
    let y = create(&tree, "Y", Some(&b)).await?;

    // X goes A -> B while Y goes B -> A; both lock A before B
    let mut handles = Vec::new();
    for (node, target) in [(x, id_of(&b)), (y, id_of(&a))] {
        let tree = tree.clone();
        handles.push(tokio::spawn(async move {
            let mut node = node;
            node.set_parent(Some(target));
            tree.save(&mut node, false).await.map(|_| node)
        }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(all_paths(&store).await?, vec!["A", "A/Y", "B", "B/X"]);
    assert!(tree.get(&id_of(&a)).await?.is_container());
    assert!(tree.get(&id_of(&b)).await?.is_container());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_renames_of_same_node() -> Result<()> {
    let (tree, store) = setup(5_000).await?;
    let a = create(&tree, "A", None).await?;
    let b = create(&tree, "B", Some(&a)).await?;
    create(&tree, "C", Some(&b)).await?;

    let mut first = a.clone();
    let mut tx = store.begin_transaction().await?;
    first.set_title("A1".to_string());
    tree.save_in(&mut tx, &mut first, false).await?;

    // Second rename starts from the same stale copy of A
    let other = tree.clone();
    let mut second = a.clone();
    let rename = tokio::spawn(async move {
        second.set_title("A2".to_string());
        other.save(&mut second, false).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!rename.is_finished());

    tx.commit().await?;
    let report = rename.await??;

    // The second rename applied on top of the first, with no mixed prefixes
    assert_eq!(report.previous_path.as_deref(), Some("A1"));
    assert_eq!(report.descendants_rewritten, 2);
    assert_eq!(all_paths(&store).await?, vec!["A2", "A2/B", "A2/B/C"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lock_wait_times_out() -> Result<()> {
    let (tree, store) = setup(50).await?;
    let mut a = create(&tree, "A", None).await?;
    create(&tree, "Apple", Some(&a)).await?;

    let mut tx = store.begin_transaction().await?;
    let mut held = a.clone();
    held.set_title("Held".to_string());
    tree.save_in(&mut tx, &mut held, false).await?;

    a.set_title("Contender".to_string());
    let result = tree.save(&mut a, false).await;
    match result {
        Err(err @ TreeError::ConcurrencyTimeout { .. }) => assert!(err.is_retryable()),
        other => panic!("expected a lock timeout, got {:?}", other.map(|r| r.path)),
    }
    assert_eq!(a.path(), "A");

    tx.commit().await?;
    assert_eq!(all_paths(&store).await?, vec!["Held", "Held/Apple"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_children_of_one_parent() -> Result<()> {
    let (tree, store) = setup(5_000).await?;
    let parent = create(&tree, "Inbox", None).await?;

    let mut handles = Vec::new();
    for i in 0..20 {
        let tree = tree.clone();
        let parent_id = id_of(&parent);
        handles.push(tokio::spawn(async move {
            let mut child = Category::new(format!("item-{:02}", i)).with_parent(parent_id);
            tree.save(&mut child, false).await.map(|_| child)
        }));
    }

    for handle in handles {
        let child = handle.await??;
        assert!(child.path().starts_with("Inbox/item-"));
    }

    assert_eq!(tree.children_of(&parent).await?.len(), 20);
    assert!(tree.get(&id_of(&parent)).await?.is_container());
    assert_eq!(all_paths(&store).await?.len(), 21);
    Ok(())
}
