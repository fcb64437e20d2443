//! The document client: one operation per store primitive.
//!
//! The client owns a handle to a [`DocumentStore`] backend and is cheap to
//! clone. Collections are addressed by path (`cities`,
//! `cities/SF/landmarks`) and documents by collection plus id.

use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::document::DocumentSnapshot;
use crate::error::{Result, StoreError};
use crate::id::auto_id;
use crate::listener::{DocumentListener, ListenerRegistration};
use crate::memory::MemoryStore;
use crate::path::{CollectionPath, DocumentPath, FieldPath};
use crate::store::DocumentStore;
use crate::transaction::{self, to_fields, Transaction, TransactionOutcome};
use crate::write::{CommitResult, FieldValue, Write};

/// Log the outcome of a client operation.
fn logged<T>(op: &'static str, subject: &impl Display, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => debug!(%subject, "{} succeeded", op),
        Err(e) => warn!(%subject, error = %e, "{} failed", op),
    }
    result
}

/// Client for a document store.
#[derive(Clone)]
pub struct DocumentClient {
    store: Arc<dyn DocumentStore>,
    config: ClientConfig,
}

impl DocumentClient {
    /// Create a client over `store` with default configuration.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, ClientConfig::default())
    }

    pub fn with_config(store: Arc<dyn DocumentStore>, config: ClientConfig) -> Self {
        Self { store, config }
    }

    /// Create a client over a fresh [`MemoryStore`].
    pub fn in_memory(config: ClientConfig) -> Self {
        let store = MemoryStore::with_watch_capacity(config.watch_capacity);
        Self::with_config(Arc::new(store), config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn document_path(collection: &str, key: &str) -> Result<DocumentPath> {
        CollectionPath::parse(collection)?.doc(key)
    }

    /// Add a document under a generated id. Returns the new document's path.
    pub async fn add_document<T: Serialize + ?Sized>(
        &self,
        collection: &str,
        data: &T,
    ) -> Result<DocumentPath> {
        let collection = CollectionPath::parse(collection)?;
        let path = collection.doc(&auto_id(self.config.auto_id_length))?;
        let fields = to_fields(data)?;

        let result = self
            .store
            .commit(vec![Write::create(path.clone(), fields)])
            .await
            .map(|_| path.clone())
            .map_err(StoreError::into_write);
        logged("add", &path, result)
    }

    /// Read one document. A missing document is a snapshot with no data.
    pub async fn get_document(&self, collection: &str, key: &str) -> Result<DocumentSnapshot> {
        let path = Self::document_path(collection, key)?;
        let result = self
            .store
            .get(&path)
            .await
            .map(|doc| DocumentSnapshot::new(path.clone(), doc))
            .map_err(StoreError::into_read);
        logged("get", &path, result)
    }

    /// Read a document and deserialize it. `None` if it does not exist.
    pub async fn get_as<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>> {
        self.get_document(collection, key)
            .await?
            .data_as()
            .map_err(StoreError::into_read)
    }

    /// Snapshot of every document directly in `collection`, in id order.
    pub async fn list_documents(&self, collection: &str) -> Result<Vec<DocumentSnapshot>> {
        let collection = CollectionPath::parse(collection)?;
        let result = self
            .store
            .list(&collection)
            .await
            .map(|docs| {
                docs.into_iter()
                    .map(|(path, doc)| DocumentSnapshot::new(path, Some(doc)))
                    .collect()
            })
            .map_err(StoreError::into_read);
        logged("list", &collection, result)
    }

    /// Create or overwrite a document. The stored mapping becomes exactly `data`.
    pub async fn set_document<T: Serialize + ?Sized>(
        &self,
        collection: &str,
        key: &str,
        data: &T,
    ) -> Result<CommitResult> {
        let path = Self::document_path(collection, key)?;
        let fields = to_fields(data)?;
        self.commit_logged("set", &path, vec![Write::set(path.clone(), fields)])
            .await
    }

    /// Merge fields into an existing document.
    ///
    /// Keys of `data` are dotted field paths (`favorites.color`); fields not
    /// named are left untouched. Fails with [`StoreError::NotFound`] if the
    /// document does not exist.
    pub async fn update_document<T: Serialize + ?Sized>(
        &self,
        collection: &str,
        key: &str,
        data: &T,
    ) -> Result<CommitResult> {
        let updates = to_fields(data)?
            .into_iter()
            .map(|(field, value)| -> Result<(FieldPath, FieldValue)> {
                Ok((FieldPath::parse(&field)?, FieldValue::Value(value)))
            })
            .collect::<Result<Vec<_>>>()?;
        self.update_fields(collection, key, updates).await
    }

    /// Update with explicit field paths and transforms.
    pub async fn update_fields(
        &self,
        collection: &str,
        key: &str,
        updates: Vec<(FieldPath, FieldValue)>,
    ) -> Result<CommitResult> {
        let path = Self::document_path(collection, key)?;
        if updates.is_empty() {
            return Err(StoreError::InvalidArgument(
                "update requires at least one field".to_string(),
            ));
        }
        self.commit_logged("update", &path, vec![Write::update(path.clone(), updates)])
            .await
    }

    /// Set `field` to the commit time assigned by the store.
    pub async fn set_server_timestamp(
        &self,
        collection: &str,
        key: &str,
        field: &str,
    ) -> Result<CommitResult> {
        let field = FieldPath::parse(field)?;
        self.update_fields(collection, key, vec![(field, FieldValue::ServerTimestamp)])
            .await
    }

    /// Delete a document. Nested collections under it are kept.
    pub async fn delete_document(&self, collection: &str, key: &str) -> Result<CommitResult> {
        let path = Self::document_path(collection, key)?;
        self.commit_logged("delete", &path, vec![Write::delete(path.clone())])
            .await
    }

    async fn commit_logged(
        &self,
        op: &'static str,
        path: &DocumentPath,
        writes: Vec<Write>,
    ) -> Result<CommitResult> {
        let result = self
            .store
            .commit(writes)
            .await
            .map_err(StoreError::into_write);
        logged(op, path, result)
    }

    /// Stream the current state of a document, then every change to it.
    pub async fn listen(&self, collection: &str, key: &str) -> Result<DocumentListener> {
        let path = Self::document_path(collection, key)?;
        let (current, events) = self
            .store
            .listen(&path)
            .await
            .map_err(StoreError::into_read)?;
        Ok(DocumentListener::new(path, current, events))
    }

    /// Call `on_change` with the current state of a document, then on every change.
    ///
    /// The listener runs on a background task until
    /// [`ListenerRegistration::remove`] is called.
    pub async fn subscribe<F>(
        &self,
        collection: &str,
        key: &str,
        on_change: F,
    ) -> Result<ListenerRegistration>
    where
        F: FnMut(DocumentSnapshot) + Send + 'static,
    {
        let listener = self.listen(collection, key).await?;
        let path = Self::document_path(collection, key)?;
        debug!(%path, "listener registered");
        Ok(ListenerRegistration::spawn(path, listener, on_change))
    }

    /// Optimistically read-modify-write one document.
    ///
    /// `f` receives the current snapshot and buffers writes on the
    /// [`Transaction`]. It may run several times if other writers commit
    /// in between; the value from the attempt that committed is returned.
    pub async fn run_transaction<T, F>(&self, collection: &str, key: &str, f: F) -> Result<T>
    where
        F: FnMut(&DocumentSnapshot, &mut Transaction) -> TransactionOutcome<T>,
    {
        let path = Self::document_path(collection, key)?;
        let result = transaction::run(self.store.as_ref(), &self.config.retry, &path, f).await;
        logged("transaction", &path, result)
    }

    /// Start a batch of writes committed together.
    pub fn batch(&self) -> WriteBatch<'_> {
        WriteBatch {
            client: self,
            writes: Vec::new(),
        }
    }
}

/// Writes applied atomically by [`WriteBatch::commit`], without a read phase.
pub struct WriteBatch<'a> {
    client: &'a DocumentClient,
    writes: Vec<Write>,
}

impl<'a> WriteBatch<'a> {
    pub fn set<T: Serialize + ?Sized>(mut self, path: &DocumentPath, data: &T) -> Result<Self> {
        self.writes.push(Write::set(path.clone(), to_fields(data)?));
        Ok(self)
    }

    pub fn update(mut self, path: &DocumentPath, updates: Vec<(FieldPath, FieldValue)>) -> Self {
        self.writes.push(Write::update(path.clone(), updates));
        self
    }

    /// Update a single field given as a dotted path.
    pub fn update_field(self, path: &DocumentPath, field: &str, value: Value) -> Result<Self> {
        let field = FieldPath::parse(field)?;
        Ok(self.update(path, vec![(field, FieldValue::Value(value))]))
    }

    pub fn delete(mut self, path: &DocumentPath) -> Self {
        self.writes.push(Write::delete(path.clone()));
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commit every write, or none of them.
    pub async fn commit(self) -> Result<CommitResult> {
        let count = self.writes.len();
        let result = self
            .client
            .store
            .commit(self.writes)
            .await
            .map_err(StoreError::into_write);
        logged("batch", &format!("{} writes", count), result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> DocumentClient {
        DocumentClient::in_memory(ClientConfig::default())
    }

    #[tokio::test]
    async fn test_add_document_generates_id() {
        let client = client();
        let path = client
            .add_document(
                "users",
                &json!({"first": "Alan", "middle": "Mathison", "last": "Turing", "born": 1912}),
            )
            .await
            .unwrap();

        assert_eq!(path.parent().as_str(), "users");
        assert_eq!(path.id().len(), 20);

        let snap = client.get_document("users", path.id()).await.unwrap();
        assert_eq!(snap.data().unwrap()["born"], json!(1912));
    }

    #[tokio::test]
    async fn test_add_document_rejects_non_map() {
        let client = client();
        let err = client.add_document("users", &json!("Alan")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_invalid_paths() {
        let client = client();
        assert!(matches!(
            client.get_document("cities/SF", "x").await,
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(
            client.get_document("cities", "a/b").await,
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_update_requires_fields() {
        let client = client();
        client.set_document("cities", "LA", &json!({})).await.unwrap();
        let err = client
            .update_document("cities", "LA", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_get_as_typed() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct City {
            name: String,
        }

        let client = client();
        client
            .set_document("cities", "LA", &json!({"name": "Los Angeles"}))
            .await
            .unwrap();

        let city: Option<City> = client.get_as("cities", "LA").await.unwrap();
        assert_eq!(city.unwrap().name, "Los Angeles");
        let missing: Option<City> = client.get_as("cities", "XX").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let client = client();
        let la = DocumentPath::parse("cities/LA").unwrap();
        let missing = DocumentPath::parse("cities/NOPE").unwrap();

        let batch = client
            .batch()
            .set(&la, &json!({"name": "LA"}))
            .unwrap()
            .update_field(&missing, "name", json!("x"))
            .unwrap();
        assert_eq!(batch.len(), 2);

        let err = batch.commit().await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!client.get_document("cities", "LA").await.unwrap().exists());

        client
            .batch()
            .set(&la, &json!({"name": "LA"}))
            .unwrap()
            .delete(&missing)
            .commit()
            .await
            .unwrap();
        assert!(client.get_document("cities", "LA").await.unwrap().exists());
    }
}
