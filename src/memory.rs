//! In-memory document store implementation.
//!
//! This implementation is NOT durable - data is lost on process exit.
//! Use for testing and development only.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::trace;

use crate::document::Document;
use crate::error::Result;
use crate::path::{CollectionPath, DocumentPath};
use crate::store::DocumentStore;
use crate::watch::{WatchSender, WatchStream};
use crate::write::{stage, touched_paths, CommitResult, Write};

#[derive(Default)]
struct State {
    documents: BTreeMap<DocumentPath, Document>,
    /// Sequence number of the last applied commit.
    sequence: u64,
}

/// In-memory implementation of DocumentStore.
///
/// Uses a BTreeMap for ordered iteration and RwLock for concurrency.
/// Watch events are published while the write lock is held, so listeners
/// see commits in the order they were applied.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    watcher: WatchSender,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_watch_capacity(1024)
    }

    /// Create a store whose watch channel buffers `capacity` events.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            watcher: WatchSender::new(capacity),
        }
    }

    /// Get the number of documents in the store, across all collections.
    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().documents.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        Ok(self.state.read().documents.get(path).cloned())
    }

    async fn list(&self, collection: &CollectionPath) -> Result<Vec<(DocumentPath, Document)>> {
        let state = self.state.read();
        let docs = state
            .documents
            .iter()
            .filter(|(path, _)| collection.contains(path))
            .map(|(path, doc)| (path.clone(), doc.clone()))
            .collect();
        Ok(docs)
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<CommitResult> {
        let mut state = self.state.write();

        let current: BTreeMap<DocumentPath, Option<Document>> = touched_paths(&writes)
            .into_iter()
            .map(|path| {
                let doc = state.documents.get(&path).cloned();
                (path, doc)
            })
            .collect();

        let sequence = state.sequence + 1;
        let (changes, result) = stage(&writes, &current, SystemTime::now(), sequence)?;
        state.sequence = sequence;

        for change in &changes {
            match &change.after {
                Some(doc) => {
                    state.documents.insert(change.path.clone(), doc.clone());
                }
                None => {
                    state.documents.remove(&change.path);
                }
            }
        }
        trace!(writes = writes.len(), changed = changes.len(), "commit applied");

        self.watcher.publish(changes);
        Ok(result)
    }

    async fn listen(&self, path: &DocumentPath) -> Result<(Option<Document>, WatchStream)> {
        let state = self.state.read();
        let stream = self.watcher.subscribe(path.clone());
        Ok((state.documents.get(path).cloned(), stream))
    }
}
