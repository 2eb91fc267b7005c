//! Performance benchmarks for PathTree core operations
//!
//! Run with: `cargo bench -p pathtree-core`
//!
//! These benchmarks measure critical path performance:
//! - Child creation under a single parent (parent lock contention path)
//! - Subtree rename cascade (descendant path rewrite)
//! - Subtree queries (ancestor and nested lookups)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pathtree_core::config::{StoreConfig, TreeConfig};
use pathtree_core::db::{MemoryStore, TursoStore};
use pathtree_core::models::{Category, HierarchicalNode};
use pathtree_core::services::HierarchicalTree;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

type MemoryTree = HierarchicalTree<MemoryStore, Category>;

/// Setup a tree over a fresh in-memory store
async fn setup_memory_tree() -> MemoryTree {
    let store = Arc::new(MemoryStore::new(StoreConfig::default()));
    HierarchicalTree::new(store, TreeConfig::default())
        .await
        .unwrap()
}

/// Setup a tree over a fresh database file
async fn setup_turso_tree() -> (HierarchicalTree<TursoStore, Category>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("bench.db");

    let store = Arc::new(TursoStore::new(db_path, StoreConfig::default()).await.unwrap());
    let tree = HierarchicalTree::new(store, TreeConfig::default())
        .await
        .unwrap();
    (tree, temp_dir)
}

/// Build a root with `width` children, each holding `width` leaves
async fn build_subtree(tree: &MemoryTree, width: usize) -> Category {
    let mut root = Category::new("Root");
    tree.save(&mut root, false).await.unwrap();

    for i in 0..width {
        let mut branch =
            Category::new(format!("Branch{}", i)).with_parent(root.id().cloned().unwrap());
        tree.save(&mut branch, false).await.unwrap();

        for j in 0..width {
            let mut leaf =
                Category::new(format!("Leaf{}", j)).with_parent(branch.id().cloned().unwrap());
            tree.save(&mut leaf, false).await.unwrap();
        }
    }

    root
}

/// Benchmark child creation
///
/// Every save locks the same parent row; this is the hot path for
/// bulk imports into one container.
fn bench_create_children(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("create_child_memory", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let tree = setup_memory_tree().await;
                let mut parent = Category::new("Parent");
                tree.save(&mut parent, false).await.unwrap();
                let parent_id = parent.id().cloned().unwrap();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    let mut child =
                        Category::new(format!("Child{}", i)).with_parent(parent_id.clone());
                    tree.save(&mut child, false).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    let mut group = c.benchmark_group("create_child_turso");
    group.sample_size(10); // Fewer samples for disk-backed writes

    group.bench_function("fsync", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let (tree, _temp) = setup_turso_tree().await;
                let mut parent = Category::new("Parent");
                tree.save(&mut parent, false).await.unwrap();
                let parent_id = parent.id().cloned().unwrap();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    let mut child =
                        Category::new(format!("Child{}", i)).with_parent(parent_id.clone());
                    tree.save(&mut child, false).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

/// Benchmark subtree rename cascade
///
/// Cost grows with the number of descendants whose path is rewritten.
fn bench_rename_cascade(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("rename_cascade");
    group.sample_size(10);

    for width in [5usize, 10, 20] {
        let descendants = width + width * width;
        group.bench_with_input(BenchmarkId::from_parameter(descendants), &width, |b, &width| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let tree = setup_memory_tree().await;
                    let mut root = build_subtree(&tree, width).await;

                    let start = std::time::Instant::now();
                    for i in 0..iters {
                        root.set_title(format!("Root{}", i));
                        let report = tree.save(&mut root, false).await.unwrap();
                        black_box(report.descendants_rewritten);
                    }
                    start.elapsed()
                })
            });
        });
    }

    group.finish();
}

/// Benchmark ancestry and subtree queries
fn bench_queries(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (tree, root) = rt.block_on(async {
        let tree = setup_memory_tree().await;
        let root = build_subtree(&tree, 10).await;
        (tree, root)
    });
    let leaf = rt.block_on(async { tree.get_by_path("Root/Branch5/Leaf5").await.unwrap() });

    c.bench_function("get_all_parents", |b| {
        b.iter(|| rt.block_on(async { black_box(tree.get_all_parents(&leaf).await.unwrap()) }))
    });

    c.bench_function("get_nested_items", |b| {
        b.iter(|| {
            rt.block_on(async { black_box(tree.get_nested_items(&root).await.unwrap().count()) })
        })
    });
}

criterion_group!(
    benches,
    bench_create_children,
    bench_rename_cascade,
    bench_queries
);
criterion_main!(benches);
