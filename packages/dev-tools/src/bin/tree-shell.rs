//! Tree Shell - Command Line Access to a Category Tree
//!
//! Small development tool for inspecting and editing a category hierarchy
//! stored in a libsql database file.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tree-shell -- add Fruit
//! cargo run --bin tree-shell -- add Apple --parent Fruit
//! cargo run --bin tree-shell -- rename Fruit Produce
//! cargo run --bin tree-shell -- move Produce/Apple --to Orchard
//! cargo run --bin tree-shell -- ls Produce
//! cargo run --bin tree-shell -- rm Produce --cascade
//! ```
//!
//! # Configuration
//!
//! The database defaults to `pathtree.db` in the working directory (`--db`).
//! `PATHTREE_LOCK_TIMEOUT_MS`, `PATHTREE_DELETE_POLICY` and
//! `PATHTREE_MAX_DEPTH` are honored; `RUST_LOG` controls logging.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pathtree_core::config::{DeletePolicy, StoreConfig, TreeConfig};
use pathtree_core::db::TursoStore;
use pathtree_core::models::{Category, HierarchicalNode};
use pathtree_core::services::HierarchicalTree;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type CategoryTree = HierarchicalTree<TursoStore, Category>;

/// Tree shell command line arguments
#[derive(Parser, Debug)]
#[command(name = "tree-shell")]
#[command(about = "Inspect and edit a materialized-path category tree")]
#[command(version)]
struct Args {
    /// Database file
    #[arg(long, value_name = "PATH", default_value = "pathtree.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a category
    Add {
        title: String,
        /// Path of the parent category (root when omitted)
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Rename a category; descendants follow
    Rename { path: String, title: String },
    /// Move a category under another one (or to the top level)
    #[command(alias = "mv")]
    Move {
        path: String,
        /// Path of the new parent (root when omitted)
        #[arg(long)]
        to: Option<String>,
    },
    /// List a subtree, or every root when no path is given
    Ls { path: Option<String> },
    /// Show the ancestor chain of a category
    Parents { path: String },
    /// Delete a category
    Rm {
        path: String,
        /// Also delete every descendant
        #[arg(long)]
        cascade: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = TursoStore::new(args.db.clone(), StoreConfig::from_env())
        .await
        .with_context(|| format!("Failed to open {}", args.db.display()))?;

    let mut config = TreeConfig::from_env();
    if let Command::Rm { cascade: true, .. } = &args.command {
        config.delete_policy = DeletePolicy::Cascade;
    }

    let tree: CategoryTree = HierarchicalTree::new(Arc::new(store), config).await?;
    tracing::debug!("Opened {}", args.db.display());

    run(&tree, args.command).await
}

async fn run(tree: &CategoryTree, command: Command) -> Result<()> {
    match command {
        Command::Add {
            title,
            parent,
            description,
        } => {
            let mut node = Category::new(title);
            if let Some(parent) = parent {
                let parent = tree.get_by_path(&parent).await?;
                node.set_parent(parent.id().cloned());
            }
            if let Some(description) = description {
                node.set_description(Some(description));
            }
            let report = tree.save(&mut node, false).await?;
            println!("{}\t{}", report.id, report.path);
        }
        Command::Rename { path, title } => {
            let mut node = tree.get_by_path(&path).await?;
            node.set_title(title);
            let report = tree.save(&mut node, false).await?;
            println!(
                "{} -> {} ({} descendants updated)",
                path, report.path, report.descendants_rewritten
            );
        }
        Command::Move { path, to } => {
            let mut node = tree.get_by_path(&path).await?;
            let parent = match to {
                Some(to) => tree.get_by_path(&to).await?.id().cloned(),
                None => None,
            };
            node.set_parent(parent);
            let report = tree.save(&mut node, true).await?;
            println!(
                "{} -> {} ({} descendants updated)",
                path, report.path, report.descendants_rewritten
            );
        }
        Command::Ls { path: None } => {
            for root in tree.roots().await? {
                print_node(&root, 0);
            }
        }
        Command::Ls { path: Some(path) } => {
            let node = tree.get_by_path(&path).await?;
            let base = pathtree_core::models::path::depth(node.path());
            print_node(&node, 0);
            for nested in tree.get_all_nested(&node, None).await? {
                let indent = pathtree_core::models::path::depth(nested.path()) - base;
                print_node(&nested, indent);
            }
        }
        Command::Parents { path } => {
            let node = tree.get_by_path(&path).await?;
            for parent in tree.get_all_parents(&node).await? {
                println!("{}", parent.path());
            }
        }
        Command::Rm { path, .. } => {
            let node = tree.get_by_path(&path).await?;
            let removed = tree.delete(&node).await?;
            println!("Removed {} row(s)", removed);
        }
    }

    Ok(())
}

fn print_node(node: &Category, indent: usize) {
    let marker = if node.is_container() { "+" } else { "-" };
    match node.description() {
        Some(description) => println!(
            "{}{} {}  # {}",
            "  ".repeat(indent),
            marker,
            node.title(),
            description
        ),
        None => println!("{}{} {}", "  ".repeat(indent), marker, node.title()),
    }
}
