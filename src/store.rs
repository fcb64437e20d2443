//! DocumentStore trait - the core abstraction for all storage backends.
//!
//! A backend provides document addressing, atomic multi-document commits
//! guarded by preconditions, and change notifications. Everything the
//! client offers (adds, merges, transactions, listeners) is built on these
//! primitives.

use async_trait::async_trait;

use crate::document::Document;
use crate::error::Result;
use crate::path::{CollectionPath, DocumentPath};
use crate::watch::WatchStream;
use crate::write::{CommitResult, Write};

/// The core document storage trait.
///
/// All storage backends (SQLite, memory) implement this trait.
/// Code should depend on this trait, not specific implementations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Get a document by path.
    ///
    /// Returns `None` if the document does not exist.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>>;

    /// List the direct children of a collection, in document id order.
    ///
    /// Documents in nested collections are not included.
    async fn list(&self, collection: &CollectionPath) -> Result<Vec<(DocumentPath, Document)>>;

    /// Apply writes atomically.
    ///
    /// Every commit takes the next value of a store-wide sequence, and each
    /// document it writes is stamped with that value as its version.
    /// Preconditions are evaluated in order against the state left by the
    /// earlier writes; if any fails, nothing is written. Watch events are
    /// published before this returns.
    async fn commit(&self, writes: Vec<Write>) -> Result<CommitResult>;

    /// Read a document and subscribe to its changes.
    ///
    /// No commit can fall between the returned state and the first event
    /// on the stream.
    async fn listen(&self, path: &DocumentPath) -> Result<(Option<Document>, WatchStream)>;

    /// Check if a document exists.
    async fn exists(&self, path: &DocumentPath) -> Result<bool> {
        Ok(self.get(path).await?.is_some())
    }

    /// Get the current version of a document (0 if not exists).
    async fn version(&self, path: &DocumentPath) -> Result<u64> {
        Ok(self.get(path).await?.map(|d| d.version).unwrap_or(0))
    }
}
