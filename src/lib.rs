//! # univrs-docstore
//!
//! Document database client for the Univrs ecosystem.
//!
//! Documents are field mappings (JSON objects) stored under
//! slash-separated paths and grouped into collections. The crate provides:
//!
//! - **Document CRUD**: add (generated ids), get, list, set, delete
//! - **Field-path updates**: merge `favorites.color` without touching siblings
//! - **Server timestamps**: fields stamped with the commit time
//! - **Optimistic transactions**: read-modify-write with retry on conflict
//! - **Realtime listeners**: current state plus every subsequent change
//!
//! ## Backends
//!
//! - [`SqliteStore`]: Embedded SQLite database (durable)
//! - [`MemoryStore`]: In-memory store (testing and development)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use univrs_docstore::{ClientConfig, DocumentClient};
//!
//! #[tokio::main]
//! async fn main() -> univrs_docstore::Result<()> {
//!     let client = DocumentClient::in_memory(ClientConfig::default());
//!
//!     client
//!         .set_document("cities", "LA", &json!({"name": "Los Angeles", "state": "CA"}))
//!         .await?;
//!     client
//!         .update_document("cities", "LA", &json!({"state": "DC"}))
//!         .await?;
//!
//!     let la = client.get_document("cities", "LA").await?;
//!     println!("{:?}", la.data());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! use univrs_docstore::{ClientConfig, DocumentClient, TransactionOutcome};
//!
//! #[tokio::main]
//! async fn main() -> univrs_docstore::Result<()> {
//!     let client = DocumentClient::in_memory(ClientConfig::default());
//!
//!     let population = client
//!         .run_transaction("cities", "SF", |snapshot, txn| {
//!             let old = snapshot
//!                 .data()
//!                 .and_then(|d| d.get("population"))
//!                 .and_then(|v| v.as_i64())
//!                 .unwrap_or(0);
//!             let new = match old.checked_add(1) {
//!                 Some(new) if new <= 1_000_000 => new,
//!                 _ => return TransactionOutcome::abort("population too big"),
//!             };
//!             match txn.update_field("population", new) {
//!                 Ok(_) => TransactionOutcome::Commit(new),
//!                 Err(e) => TransactionOutcome::abort(e.to_string()),
//!             }
//!         })
//!         .await?;
//!     println!("population: {}", population);
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod id;
pub mod listener;
pub mod memory;
pub mod path;
pub mod sample;
pub mod sqlite;
pub mod store;
pub mod transaction;
pub mod watch;
pub mod write;

// Re-export main types
pub use client::{DocumentClient, WriteBatch};
pub use config::{ClientConfig, RetryConfig};
pub use document::{Document, DocumentSnapshot, Fields};
pub use error::{Result, StoreError};
pub use listener::{DocumentListener, ListenerRegistration};
pub use memory::MemoryStore;
pub use path::{CollectionPath, DocumentPath, FieldPath, MAX_PATH_LENGTH};
pub use sqlite::SqliteStore;
pub use store::DocumentStore;
pub use transaction::{Transaction, TransactionOutcome};
pub use watch::{EventType, WatchEvent, WatchStream};
pub use write::{CommitResult, FieldValue, Precondition, Write};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::client::DocumentClient;
    pub use crate::config::ClientConfig;
    pub use crate::document::{DocumentSnapshot, Fields};
    pub use crate::error::{Result, StoreError};
    pub use crate::memory::MemoryStore;
    pub use crate::path::{DocumentPath, FieldPath};
    pub use crate::sqlite::SqliteStore;
    pub use crate::store::DocumentStore;
    pub use crate::transaction::TransactionOutcome;
    pub use crate::write::FieldValue;
}
