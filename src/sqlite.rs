//! SQLite document store implementation.
//!
//! Features:
//! - WAL mode for concurrent readers
//! - Atomic commits inside a single SQLite transaction
//! - Watch via in-memory channels (per-process)

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::document::{Document, Fields};
use crate::error::{Result, StoreError};
use crate::path::{CollectionPath, DocumentPath};
use crate::store::DocumentStore;
use crate::watch::{WatchSender, WatchStream};
use crate::write::{stage, touched_paths, CommitResult, Write};

type DocumentRow = (String, i64, i64, i64);
type ListedRow = (String, String, i64, i64, i64);

/// SQLite implementation of DocumentStore.
///
/// Uses WAL mode for performance and durability.
/// Watch notifications are in-process only (not shared across processes).
pub struct SqliteStore {
    pool: SqlitePool,
    watcher: WatchSender,
    /// Serializes commits with listener registration.
    commit_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open or create a SQLite store at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening SQLite document store at {:?}", path);

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| StoreError::Read(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;

        Self::from_pool(pool).await
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Read(e.to_string()))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // Every connection to :memory: is its own database, so the single
        // connection must never be closed and replaced.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self {
            pool,
            watcher: WatchSender::new(1024),
            commit_lock: Mutex::new(()),
        };

        store.init_schema().await?;
        Ok(store)
    }

    /// Replace the watch channel with one buffering `capacity` events.
    ///
    /// Must be called before any listener is registered.
    pub fn with_watch_capacity(mut self, capacity: usize) -> Self {
        self.watcher = WatchSender::new(capacity);
        self
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY NOT NULL,
                collection TEXT NOT NULL,
                fields TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                create_time INTEGER NOT NULL,
                update_time INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection, path);

            CREATE TABLE IF NOT EXISTS commit_sequence (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                value INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO commit_sequence (id, value)
                SELECT 0, COALESCE(MAX(version), 0) FROM documents;
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite schema initialized");
        Ok(())
    }

    /// Microseconds since the Unix epoch.
    fn to_micros(time: SystemTime) -> i64 {
        time.duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as i64
    }

    fn from_micros(micros: i64) -> SystemTime {
        UNIX_EPOCH + Duration::from_micros(micros.max(0) as u64)
    }

    fn row_to_document(
        (fields, version, create_time, update_time): DocumentRow,
    ) -> Result<Document> {
        let fields: Fields = serde_json::from_str(&fields)?;
        Ok(Document {
            fields,
            version: version as u64,
            create_time: Self::from_micros(create_time),
            update_time: Self::from_micros(update_time),
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT fields, version, create_time, update_time FROM documents WHERE path = ?",
        )
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_document).transpose()
    }

    async fn list(&self, collection: &CollectionPath) -> Result<Vec<(DocumentPath, Document)>> {
        let rows: Vec<ListedRow> = sqlx::query_as(
            r#"
            SELECT path, fields, version, create_time, update_time
            FROM documents WHERE collection = ? ORDER BY path
            "#,
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(path, fields, version, create_time, update_time)| {
                let path = DocumentPath::parse(&path)?;
                let doc = Self::row_to_document((fields, version, create_time, update_time))?;
                Ok((path, doc))
            })
            .collect()
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<CommitResult> {
        let _guard = self.commit_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        // Taking the sequence first also takes the write lock for the
        // whole transaction. A failed commit rolls the increment back.
        sqlx::query("UPDATE commit_sequence SET value = value + 1 WHERE id = 0")
            .execute(&mut *tx)
            .await?;
        let sequence: i64 = sqlx::query_scalar("SELECT value FROM commit_sequence WHERE id = 0")
            .fetch_one(&mut *tx)
            .await?;

        // Load the current state of every touched document
        let mut current = BTreeMap::new();
        for path in touched_paths(&writes) {
            let row: Option<DocumentRow> = sqlx::query_as(
                "SELECT fields, version, create_time, update_time FROM documents WHERE path = ?",
            )
            .bind(path.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            current.insert(path, row.map(Self::row_to_document).transpose()?);
        }

        // Stored times have microsecond precision; hand back the same value.
        let commit_time = Self::from_micros(Self::to_micros(SystemTime::now()));
        let (changes, result) = stage(&writes, &current, commit_time, sequence as u64)?;

        for change in &changes {
            match &change.after {
                Some(doc) => {
                    let fields = serde_json::to_string(&doc.fields)?;
                    sqlx::query(
                        r#"
                        INSERT INTO documents (path, collection, fields, version, create_time, update_time)
                        VALUES (?, ?, ?, ?, ?, ?)
                        ON CONFLICT(path) DO UPDATE SET
                            fields = excluded.fields,
                            version = excluded.version,
                            update_time = excluded.update_time
                        "#,
                    )
                    .bind(change.path.as_str())
                    .bind(change.path.parent().as_str())
                    .bind(&fields)
                    .bind(doc.version as i64)
                    .bind(Self::to_micros(doc.create_time))
                    .bind(Self::to_micros(doc.update_time))
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM documents WHERE path = ?")
                        .bind(change.path.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        debug!(writes = writes.len(), changed = changes.len(), "commit applied");

        // Send events after successful commit
        self.watcher.publish(changes);
        Ok(result)
    }

    async fn listen(&self, path: &DocumentPath) -> Result<(Option<Document>, WatchStream)> {
        let _guard = self.commit_lock.lock().await;
        let stream = self.watcher.subscribe(path.clone());
        let doc = self.get(path).await?;
        Ok((doc, stream))
    }
}
