//! Optimistic read-modify-write of a single record.
//!
//! A transaction reads one document, hands the snapshot to a caller
//! function, and commits whatever writes the function buffered, guarded by
//! a version check on the document that was read. If another writer got
//! there first, the document is read again and the function runs again.
//!
//! The function may therefore run several times for one call. It must not
//! perform I/O or touch anything outside the [`Transaction`] it is given.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::RetryConfig;
use crate::document::{DocumentSnapshot, Fields};
use crate::error::{Result, StoreError};
use crate::path::{DocumentPath, FieldPath};
use crate::store::DocumentStore;
use crate::write::{FieldValue, Write};

/// What a transaction function decided for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome<T> {
    /// Commit the buffered writes and return this value to the caller.
    Commit(T),
    /// Give up without writing. Surfaces as [`StoreError::Validation`].
    Abort(String),
    /// Discard the buffered writes and run again on a fresh read.
    Retry,
}

impl<T> TransactionOutcome<T> {
    pub fn abort(reason: impl Into<String>) -> Self {
        TransactionOutcome::Abort(reason.into())
    }
}

/// Writes buffered by one attempt of a transaction function.
#[derive(Debug)]
pub struct Transaction {
    path: DocumentPath,
    writes: Vec<Write>,
}

impl Transaction {
    fn new(path: DocumentPath) -> Self {
        Self {
            path,
            writes: Vec::new(),
        }
    }

    /// The document this transaction read.
    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    /// Overwrite a document.
    pub fn set<T: Serialize>(&mut self, path: &DocumentPath, data: &T) -> Result<&mut Self> {
        let fields = to_fields(data)?;
        self.writes.push(Write::set(path.clone(), fields));
        Ok(self)
    }

    /// Merge field paths into an existing document.
    pub fn update(
        &mut self,
        path: &DocumentPath,
        fields: Vec<(FieldPath, FieldValue)>,
    ) -> &mut Self {
        self.writes.push(Write::update(path.clone(), fields));
        self
    }

    /// Update a single field of the document that was read.
    pub fn update_field(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<&mut Self> {
        let field = FieldPath::parse(field)?;
        let path = self.path.clone();
        Ok(self.update(&path, vec![(field, value.into())]))
    }

    /// Delete a document.
    pub fn delete(&mut self, path: &DocumentPath) -> &mut Self {
        self.writes.push(Write::delete(path.clone()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Serialize `data` into a document field mapping.
pub(crate) fn to_fields<T: Serialize + ?Sized>(data: &T) -> Result<Fields> {
    match serde_json::to_value(data)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::InvalidArgument(format!(
            "document data must be a map, got {}",
            other
        ))),
    }
}

/// Run `f` against `path` until it commits, aborts, or the retry budget runs out.
pub(crate) async fn run<T, F>(
    store: &dyn DocumentStore,
    retry: &RetryConfig,
    path: &DocumentPath,
    mut f: F,
) -> Result<T>
where
    F: FnMut(&DocumentSnapshot, &mut Transaction) -> TransactionOutcome<T>,
{
    let attempts = retry.max_retries + 1;

    for attempt in 0..attempts {
        let document = store.get(path).await.map_err(StoreError::into_read)?;
        let snapshot = DocumentSnapshot::new(path.clone(), document);
        let mut txn = Transaction::new(path.clone());

        match f(&snapshot, &mut txn) {
            TransactionOutcome::Abort(reason) => {
                debug!(%path, attempt, %reason, "transaction aborted");
                return Err(StoreError::Validation(reason));
            }
            TransactionOutcome::Retry => {
                debug!(%path, attempt, "transaction asked to retry");
            }
            TransactionOutcome::Commit(value) => {
                let mut writes = Vec::with_capacity(txn.writes.len() + 1);
                writes.push(Write::verify(path.clone(), snapshot.version()));
                writes.append(&mut txn.writes);

                match store.commit(writes).await {
                    Ok(_) => {
                        debug!(%path, attempt, "transaction committed");
                        return Ok(value);
                    }
                    Err(e) if e.is_retryable() => {
                        debug!(%path, attempt, error = %e, "transaction conflict");
                    }
                    Err(e) => return Err(e.into_write()),
                }
            }
        }

        if attempt + 1 < attempts {
            tokio::time::sleep(retry.calculate_delay(attempt)).await;
        }
    }

    Err(StoreError::RetriesExhausted { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::write::CommitResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::document::Document;
    use crate::path::CollectionPath;
    use crate::watch::WatchStream;

    fn path(p: &str) -> DocumentPath {
        DocumentPath::parse(p).unwrap()
    }

    fn fast_retry(max_retries: usize) -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(max_retries)
            .with_base_delay_ms(0)
            .with_max_delay_ms(0)
    }

    async fn seed(store: &MemoryStore, p: &str, data: Value) {
        store
            .commit(vec![Write::set(path(p), to_fields(&data).unwrap())])
            .await
            .unwrap();
    }

    /// Wraps a store and sneaks in a competing commit before the first few commits.
    struct Contended {
        inner: MemoryStore,
        remaining: AtomicUsize,
        competing: fn(DocumentPath) -> Vec<Write>,
    }

    impl Contended {
        fn new(remaining: usize, competing: fn(DocumentPath) -> Vec<Write>) -> Self {
            Self {
                inner: MemoryStore::new(),
                remaining: AtomicUsize::new(remaining),
                competing,
            }
        }
    }

    fn touch(target: DocumentPath) -> Vec<Write> {
        vec![Write::update(
            target,
            vec![(FieldPath::parse("touched").unwrap(), true.into())],
        )]
    }

    fn delete_and_recreate(target: DocumentPath) -> Vec<Write> {
        vec![
            Write::delete(target.clone()),
            Write::set(target, to_fields(&json!({"population": 500})).unwrap()),
        ]
    }

    #[async_trait]
    impl DocumentStore for Contended {
        async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
            self.inner.get(path).await
        }

        async fn list(
            &self,
            collection: &CollectionPath,
        ) -> Result<Vec<(DocumentPath, Document)>> {
            self.inner.list(collection).await
        }

        async fn commit(&self, writes: Vec<Write>) -> Result<CommitResult> {
            let left = self.remaining.load(Ordering::SeqCst);
            if left > 0 {
                self.remaining.store(left - 1, Ordering::SeqCst);
                let target = writes[0].path.clone();
                for write in (self.competing)(target) {
                    self.inner.commit(vec![write]).await?;
                }
            }
            self.inner.commit(writes).await
        }

        async fn listen(&self, path: &DocumentPath) -> Result<(Option<Document>, WatchStream)> {
            self.inner.listen(path).await
        }
    }

    #[tokio::test]
    async fn test_commit_returns_value() {
        let store = MemoryStore::new();
        seed(&store, "cities/SF", json!({"population": 10})).await;

        let result = run(&store, &fast_retry(0), &path("cities/SF"), |snap, txn| {
            let pop = snap.data().and_then(|d| d["population"].as_i64()).unwrap_or(0);
            txn.update_field("population", pop + 1).unwrap();
            TransactionOutcome::Commit(pop + 1)
        })
        .await
        .unwrap();

        assert_eq!(result, 11);
        let doc = store.get(&path("cities/SF")).await.unwrap().unwrap();
        assert_eq!(doc.fields["population"], json!(11));
    }

    #[tokio::test]
    async fn test_abort_writes_nothing() {
        let store = MemoryStore::new();
        seed(&store, "cities/SF", json!({"population": 10})).await;

        let result: Result<()> = run(&store, &fast_retry(3), &path("cities/SF"), |_, txn| {
            txn.update_field("population", 0).unwrap();
            TransactionOutcome::abort("nope")
        })
        .await;

        assert!(matches!(result, Err(StoreError::Validation(ref r)) if r == "nope"));
        let doc = store.get(&path("cities/SF")).await.unwrap().unwrap();
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn test_conflict_reruns_function() {
        let store = Contended::new(2, touch);
        seed(&store.inner, "cities/SF", json!({"population": 10})).await;

        let calls = AtomicUsize::new(0);
        let result = run(&store, &fast_retry(5), &path("cities/SF"), |snap, txn| {
            calls.fetch_add(1, Ordering::SeqCst);
            let pop = snap.data().and_then(|d| d["population"].as_i64()).unwrap_or(0);
            txn.update_field("population", pop + 1).unwrap();
            TransactionOutcome::Commit(snap.version())
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two competing writes bumped the version from 1 to 3 before we won
        assert_eq!(result, 3);
        let doc = store.inner.get(&path("cities/SF")).await.unwrap().unwrap();
        assert_eq!(doc.fields["population"], json!(11));
        assert_eq!(doc.fields["touched"], json!(true));
    }

    #[tokio::test]
    async fn test_delete_and_recreate_reruns_function() {
        let store = Contended::new(1, delete_and_recreate);
        seed(&store.inner, "cities/SF", json!({"population": 10})).await;

        let calls = AtomicUsize::new(0);
        let result = run(&store, &fast_retry(5), &path("cities/SF"), |snap, txn| {
            calls.fetch_add(1, Ordering::SeqCst);
            let pop = snap.data().and_then(|d| d["population"].as_i64()).unwrap_or(0);
            txn.update_field("population", pop + 1).unwrap();
            TransactionOutcome::Commit(pop + 1)
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result, 501);
        let doc = store.inner.get(&path("cities/SF")).await.unwrap().unwrap();
        assert_eq!(doc.fields["population"], json!(501));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let store = Contended::new(10, touch);
        seed(&store.inner, "cities/SF", json!({"population": 10})).await;

        let result = run(&store, &fast_retry(2), &path("cities/SF"), |_, txn| {
            txn.update_field("population", 1).unwrap();
            TransactionOutcome::Commit(())
        })
        .await;

        assert!(matches!(
            result,
            Err(StoreError::RetriesExhausted { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_retry_outcome_counts_against_budget() {
        let store = MemoryStore::new();
        let calls = AtomicUsize::new(0);

        let result: Result<()> = run(&store, &fast_retry(1), &path("cities/SF"), |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            TransactionOutcome::Retry
        })
        .await;

        assert!(matches!(result, Err(StoreError::RetriesExhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_document_is_version_zero() {
        let store = MemoryStore::new();

        let created = run(&store, &fast_retry(0), &path("cities/NEW"), |snap, txn| {
            assert!(!snap.exists());
            txn.set(&snap.path, &json!({"population": 1})).unwrap();
            TransactionOutcome::Commit(true)
        })
        .await
        .unwrap();

        assert!(created);
        assert!(store.exists(&path("cities/NEW")).await.unwrap());
    }

    #[test]
    fn test_to_fields_rejects_non_maps() {
        assert!(to_fields(&json!({"a": 1})).is_ok());
        assert!(matches!(
            to_fields(&json!([1, 2])),
            Err(StoreError::InvalidArgument(_))
        ));
    }
}
