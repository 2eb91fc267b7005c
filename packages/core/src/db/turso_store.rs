//! TursoStore - Row Store Implementation for the Turso/libsql Backend
//!
//! This module implements [`TransactionalRowStore`] on an embedded libsql
//! (SQLite-compatible) database file.
//!
//! # Locking Model
//!
//! SQLite has no row locks. Every transaction starts with `BEGIN IMMEDIATE`,
//! which takes the database write lock up front, so `lock_for_update` is a
//! plain read under an exclusive writer. Writers therefore serialize on the
//! whole file rather than per row; readers are never blocked (WAL mode).
//! A writer that cannot get the lock within the busy timeout fails with
//! `StoreError::LockTimeout`.
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions** so that every
//! connection waits on `SQLITE_BUSY` instead of failing immediately.
//!
//! # Examples
//!
//! ```rust,no_run
//! use pathtree_core::db::{TursoStore, TransactionalRowStore};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = TursoStore::new(PathBuf::from("./data/tree.db"), Default::default()).await?;
//!     store.ensure_table("categories").await?;
//!     Ok(())
//! }
//! ```

use crate::config::StoreConfig;
use crate::db::row_store::{
    NodeFilter, OrderBy, RowCursor, StoreTransaction, TransactionalRowStore,
};
use crate::db::StoreError;
use crate::models::{NewNodeRecord, NodeField, NodeId, NodeRecord};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::params::Params;
use libsql::{Builder, Connection, Database, Row, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// SQLite primary result codes we react to
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

/// TursoStore implements [`TransactionalRowStore`] on libsql
#[derive(Debug, Clone)]
pub struct TursoStore {
    /// libsql database handle (wrapped in Arc for sharing)
    db: Arc<Database>,

    /// Path to the database file
    db_path: PathBuf,

    config: StoreConfig,
}

impl TursoStore {
    /// Open (or create) a database file
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Switch the journal to WAL so readers never wait on writers
    ///
    /// Tables are created per node kind with [`TransactionalRowStore::ensure_table`].
    pub async fn new(db_path: PathBuf, config: StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| StoreError::connection_failed(db_path.clone(), e))?;

        let store = Self {
            db: Arc::new(db),
            db_path,
            config,
        };

        let conn = store.connect_with_timeout().await?;
        execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Get a raw connection (no busy timeout)
    pub fn connect(&self) -> Result<Connection, StoreError> {
        self.db.connect().map_err(StoreError::Database)
    }

    /// Get a connection with the configured busy timeout
    pub async fn connect_with_timeout(&self) -> Result<Connection, StoreError> {
        let conn = self.connect()?;
        execute_pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", self.config.busy_timeout_ms),
        )
        .await?;
        Ok(conn)
    }

    fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.config.busy_timeout_ms)
    }
}

/// Execute a PRAGMA statement
///
/// PRAGMA statements return rows, so we must use query() instead of execute().
async fn execute_pragma(conn: &Connection, pragma: &str) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(pragma).await.map_err(|e| {
        StoreError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
    })?;
    let _ = stmt.query(()).await.map_err(|e| {
        StoreError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
    })?;
    Ok(())
}

/// Quote a table name as an SQL identifier
fn quote_ident(table: &str) -> String {
    format!("\"{}\"", table.replace('"', "\"\""))
}

/// Map libsql errors onto store error kinds
fn classify(table: &str, waited: Duration, err: libsql::Error) -> StoreError {
    if let libsql::Error::SqliteFailure(code, message) = &err {
        let primary = code & 0xff;
        if primary == SQLITE_BUSY || primary == SQLITE_LOCKED {
            tracing::warn!("Database busy while writing {}: {}", table, message);
            return StoreError::lock_timeout(table, "*", waited);
        }
        if primary == SQLITE_CONSTRAINT && message.contains("UNIQUE") {
            return StoreError::unique_violation(table, message.clone());
        }
    }
    StoreError::Database(err)
}

/// Parse timestamp from database - handles both SQLite and RFC3339 formats
///
/// SQLite CURRENT_TIMESTAMP returns: "YYYY-MM-DD HH:MM:SS"
/// Rows written by this store use RFC3339: "YYYY-MM-DDTHH:MM:SS.ffffffZ"
fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    Err(anyhow::anyhow!(
        "Unable to parse timestamp '{}' as SQLite or RFC3339 format",
        s
    ))
}

/// Columns selected for every row read, in `row_to_record` order
fn select_columns(table: &str) -> String {
    format!(
        "n.id, n.title, n.path, n.parent_id, n.is_container, n.properties, n.created_at, n.modified_at,
         EXISTS(SELECT 1 FROM {} AS c WHERE c.parent_id = n.id) AS has_children",
        quote_ident(table)
    )
}

/// Convert libsql::Row to a NodeRecord
///
/// # Row Format
///
/// Expected columns (in order):
/// - id (TEXT)
/// - title (TEXT)
/// - path (TEXT)
/// - parent_id (TEXT, nullable)
/// - is_container (BOOLEAN)
/// - properties (TEXT, JSON)
/// - created_at (TEXT)
/// - modified_at (TEXT)
/// - has_children (computed BOOLEAN)
fn row_to_record(row: &Row) -> anyhow::Result<NodeRecord> {
    let id: String = row.get(0).context("Failed to get id")?;
    let title: String = row.get(1).context("Failed to get title")?;
    let path: String = row.get(2).context("Failed to get path")?;
    let parent_id: Option<String> = row.get(3).context("Failed to get parent_id")?;
    let is_container: bool = row.get(4).context("Failed to get is_container")?;
    let properties_json: String = row.get(5).context("Failed to get properties")?;
    let created_at_str: String = row.get(6).context("Failed to get created_at")?;
    let modified_at_str: String = row.get(7).context("Failed to get modified_at")?;
    let has_children: bool = row.get(8).context("Failed to get has_children")?;

    let created_at = parse_timestamp(&created_at_str).context("Failed to parse created_at")?;
    let modified_at = parse_timestamp(&modified_at_str).context("Failed to parse modified_at")?;
    let properties =
        serde_json::from_str(&properties_json).context("Failed to parse properties JSON")?;

    Ok(NodeRecord {
        id: NodeId::from_string(id),
        title,
        path,
        parent_id: parent_id.map(NodeId::from_string),
        is_container,
        properties,
        created_at,
        modified_at,
        has_children,
    })
}

/// Smallest string greater than every string starting with `prefix`
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Translate a filter into a WHERE/ORDER/LIMIT tail and its parameters
fn filter_to_sql(filter: &NodeFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(id) = &filter.id {
        clauses.push("n.id = ?".to_string());
        values.push(Value::Text(id.to_string()));
    }
    if let Some(id) = &filter.exclude_id {
        clauses.push("n.id <> ?".to_string());
        values.push(Value::Text(id.to_string()));
    }
    if let Some(path) = &filter.path {
        clauses.push("n.path = ?".to_string());
        values.push(Value::Text(path.clone()));
    }
    if let Some(paths) = &filter.paths {
        if paths.is_empty() {
            clauses.push("0".to_string());
        } else {
            let placeholders = vec!["?"; paths.len()].join(", ");
            clauses.push(format!("n.path IN ({})", placeholders));
            values.extend(paths.iter().cloned().map(Value::Text));
        }
    }
    if let Some(prefix) = &filter.path_prefix {
        // Range scan keeps the prefix match on the path index
        clauses.push("n.path >= ?".to_string());
        values.push(Value::Text(prefix.clone()));
        if let Some(upper) = prefix_upper_bound(prefix) {
            clauses.push("n.path < ?".to_string());
            values.push(Value::Text(upper));
        }
    }
    if let Some(title) = &filter.title {
        clauses.push("n.title = ?".to_string());
        values.push(Value::Text(title.clone()));
    }
    if let Some(parent_id) = &filter.parent_id {
        clauses.push("n.parent_id = ?".to_string());
        values.push(Value::Text(parent_id.to_string()));
    }
    match filter.is_root {
        Some(true) => clauses.push("n.parent_id IS NULL".to_string()),
        Some(false) => clauses.push("n.parent_id IS NOT NULL".to_string()),
        None => {}
    }
    if let Some(is_container) = filter.is_container {
        clauses.push("n.is_container = ?".to_string());
        values.push(Value::Integer(i64::from(is_container)));
    }

    let mut sql = String::new();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    match filter.order_by {
        Some(OrderBy::PathAsc) => sql.push_str(" ORDER BY n.path ASC"),
        Some(OrderBy::PathDesc) => sql.push_str(" ORDER BY n.path DESC"),
        None => {}
    }
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        values.push(Value::Integer(limit as i64));
    }

    (sql, values)
}

async fn query_records(
    conn: &Connection,
    table: &str,
    filter: &NodeFilter,
    waited: Duration,
) -> Result<Vec<NodeRecord>, StoreError> {
    let (tail, values) = filter_to_sql(filter);
    let sql = format!(
        "SELECT {} FROM {} AS n{}",
        select_columns(table),
        quote_ident(table),
        tail
    );

    let mut rows = conn
        .query(&sql, Params::Positional(values))
        .await
        .map_err(|e| classify(table, waited, e))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next().await? {
        records.push(row_to_record(&row)?);
    }
    Ok(records)
}

async fn count_records(
    conn: &Connection,
    table: &str,
    filter: &NodeFilter,
) -> Result<usize, StoreError> {
    let (tail, values) = filter_to_sql(filter);
    let sql = format!("SELECT COUNT(*) FROM {} AS n{}", quote_ident(table), tail);

    let mut rows = conn.query(&sql, Params::Positional(values)).await?;
    let count: i64 = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => 0,
    };
    Ok(count.max(0) as usize)
}

#[async_trait]
impl TransactionalRowStore for TursoStore {
    type Transaction = TursoTransaction;

    async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        let conn = self.connect_with_timeout().await?;
        let quoted = quote_ident(table);

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    path TEXT NOT NULL,
                    parent_id TEXT,
                    is_container BOOLEAN NOT NULL DEFAULT FALSE,
                    properties JSON NOT NULL DEFAULT '{{}}',
                    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                    modified_at DATETIME DEFAULT CURRENT_TIMESTAMP
                )",
                quoted
            ),
            (),
        )
        .await
        .map_err(|e| StoreError::sql_execution(format!("Failed to create {}: {}", table, e)))?;

        // Unique path index doubles as the prefix-scan index
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {}(path)",
                quote_ident(&format!("idx_{}_path", table)),
                quoted
            ),
            (),
        )
        .await
        .map_err(|e| {
            StoreError::sql_execution(format!("Failed to create path index on {}: {}", table, e))
        })?;

        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(parent_id)",
                quote_ident(&format!("idx_{}_parent", table)),
                quoted
            ),
            (),
        )
        .await
        .map_err(|e| {
            StoreError::sql_execution(format!(
                "Failed to create parent index on {}: {}",
                table, e
            ))
        })?;

        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, StoreError> {
        let conn = self.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| classify("*", self.busy_timeout(), e))?;

        Ok(TursoTransaction {
            conn,
            waited: self.busy_timeout(),
            active: true,
        })
    }

    async fn get_by_id(&self, table: &str, id: &NodeId) -> Result<NodeRecord, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let records = query_records(
            &conn,
            table,
            &NodeFilter::by_id(id.clone()),
            self.busy_timeout(),
        )
        .await?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found(table, id))
    }

    async fn find(&self, table: &str, filter: &NodeFilter) -> Result<RowCursor, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let records = query_records(&conn, table, filter, self.busy_timeout()).await?;
        Ok(RowCursor::new(records))
    }

    async fn count(&self, table: &str, filter: &NodeFilter) -> Result<usize, StoreError> {
        let conn = self.connect_with_timeout().await?;
        count_records(&conn, table, filter).await
    }
}

/// Transaction on a [`TursoStore`]
///
/// Holds its own connection. Dropping it without `commit` closes the
/// connection, which makes SQLite roll the transaction back.
pub struct TursoTransaction {
    conn: Connection,
    waited: Duration,
    active: bool,
}

impl TursoTransaction {
    fn ensure_active(&self) -> Result<(), StoreError> {
        if self.active {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed)
        }
    }
}

#[async_trait]
impl StoreTransaction for TursoTransaction {
    async fn lock_for_update(
        &mut self,
        table: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeRecord>, StoreError> {
        // BEGIN IMMEDIATE already holds the writer lock
        self.ensure_active()?;
        query_records(&self.conn, table, filter, self.waited).await
    }

    async fn find(
        &mut self,
        table: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeRecord>, StoreError> {
        self.ensure_active()?;
        query_records(&self.conn, table, filter, self.waited).await
    }

    async fn count(&mut self, table: &str, filter: &NodeFilter) -> Result<usize, StoreError> {
        self.ensure_active()?;
        count_records(&self.conn, table, filter).await
    }

    async fn insert(&mut self, table: &str, row: NewNodeRecord) -> Result<NodeRecord, StoreError> {
        self.ensure_active()?;

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
        let properties_json = serde_json::to_string(&record.properties)?;
        let timestamp = now.to_rfc3339();

        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (id, title, path, parent_id, is_container, properties, created_at, modified_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    quote_ident(table)
                ),
                (
                    record.id.as_str(),
                    record.title.as_str(),
                    record.path.as_str(),
                    record.parent_id.as_ref().map(|id| id.as_str()),
                    i64::from(record.is_container),
                    properties_json.as_str(),
                    timestamp.as_str(),
                    timestamp.as_str(),
                ),
            )
            .await
            .map_err(|e| classify(table, self.waited, e))?;

        Ok(record)
    }

    async fn update_fields(
        &mut self,
        table: &str,
        record: &NodeRecord,
        fields: &[NodeField],
    ) -> Result<(), StoreError> {
        self.ensure_active()?;

        let mut assignments: Vec<String> = Vec::with_capacity(fields.len() + 1);
        let mut values: Vec<Value> = Vec::with_capacity(fields.len() + 2);
        for field in fields {
            assignments.push(format!("{} = ?", field.column()));
            values.push(match field {
                NodeField::Title => Value::Text(record.title.clone()),
                NodeField::Path => Value::Text(record.path.clone()),
                NodeField::Parent => match &record.parent_id {
                    Some(id) => Value::Text(id.to_string()),
                    None => Value::Null,
                },
                NodeField::IsContainer => Value::Integer(i64::from(record.is_container)),
                NodeField::Properties => Value::Text(serde_json::to_string(&record.properties)?),
            });
        }
        assignments.push("modified_at = ?".to_string());
        values.push(Value::Text(Utc::now().to_rfc3339()));
        values.push(Value::Text(record.id.to_string()));

        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE {} SET {} WHERE id = ?",
                    quote_ident(table),
                    assignments.join(", ")
                ),
                Params::Positional(values),
            )
            .await
            .map_err(|e| classify(table, self.waited, e))?;

        if changed == 0 {
            return Err(StoreError::not_found(table, &record.id));
        }
        Ok(())
    }

    async fn delete(&mut self, table: &str, id: &NodeId) -> Result<(), StoreError> {
        self.ensure_active()?;
        let changed = self
            .conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?", quote_ident(table)),
                [id.as_str()],
            )
            .await
            .map_err(|e| classify(table, self.waited, e))?;

        if changed == 0 {
            return Err(StoreError::not_found(table, id));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_active()?;
        self.conn
            .execute("COMMIT", ())
            .await
            .map_err(|e| classify("*", self.waited, e))?;
        self.active = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_active()?;
        self.active = false;
        self.conn.execute("ROLLBACK", ()).await?;
        Ok(())
    }
}

impl Drop for TursoTransaction {
    fn drop(&mut self) {
        if self.active {
            tracing::debug!("Dropping open libsql transaction; connection close rolls it back");
        }
    }
}
