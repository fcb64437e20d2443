//! Realtime document listeners.
//!
//! A listener yields the current state of a document first, then a new
//! snapshot for every committed change, until it is cancelled. Two flavors:
//!
//! - [`DocumentListener`]: a `Stream` of snapshots; dropping it cancels.
//! - [`ListenerRegistration`]: a callback driven by a background task;
//!   it keeps running until [`ListenerRegistration::remove`] is called.

use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::document::{Document, DocumentSnapshot};
use crate::path::DocumentPath;
use crate::watch::WatchStream;

/// Stream of snapshots of one document.
pub struct DocumentListener {
    initial: Option<DocumentSnapshot>,
    events: WatchStream,
}

impl DocumentListener {
    pub(crate) fn new(path: DocumentPath, current: Option<Document>, events: WatchStream) -> Self {
        Self {
            initial: Some(DocumentSnapshot::new(path, current)),
            events,
        }
    }
}

impl Stream for DocumentListener {
    type Item = DocumentSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(initial) = self.initial.take() {
            return Poll::Ready(Some(initial));
        }
        Pin::new(&mut self.events)
            .poll_next(cx)
            .map(|event| event.map(|e| DocumentSnapshot::new(e.path, e.document)))
    }
}

struct ListenerState {
    path: DocumentPath,
    /// Held while a callback runs; `false` once removed.
    active: Mutex<bool>,
}

/// Handle to a callback listener.
///
/// Dropping the handle does NOT stop the listener; call [`remove`](Self::remove).
pub struct ListenerRegistration {
    state: Arc<ListenerState>,
    task: JoinHandle<()>,
}

impl ListenerRegistration {
    /// Drive `listener` on a background task, passing each snapshot to `on_change`.
    pub(crate) fn spawn<F>(path: DocumentPath, mut listener: DocumentListener, mut on_change: F) -> Self
    where
        F: FnMut(DocumentSnapshot) + Send + 'static,
    {
        let state = Arc::new(ListenerState {
            path,
            active: Mutex::new(true),
        });

        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Some(snapshot) = listener.next().await {
                if !deliver(&task_state, &mut on_change, snapshot) {
                    break;
                }
            }
            debug!(path = %task_state.path, "listener finished");
        });

        Self { state, task }
    }

    /// Stop the listener.
    ///
    /// Once this returns, `on_change` will not be invoked again. If a
    /// callback is running on another thread, this waits for it to finish.
    /// Must not be called from inside the listener's own callback.
    pub fn remove(&self) {
        let mut active = self.state.active.lock();
        if *active {
            *active = false;
            self.task.abort();
            debug!(path = %self.state.path, "listener removed");
        }
    }

    pub fn is_active(&self) -> bool {
        *self.state.active.lock()
    }

    pub fn path(&self) -> &DocumentPath {
        &self.state.path
    }
}

/// Invoke the callback unless the listener was removed. Returns false once removed.
fn deliver<F>(state: &ListenerState, on_change: &mut F, snapshot: DocumentSnapshot) -> bool
where
    F: FnMut(DocumentSnapshot),
{
    let active = state.active.lock();
    if !*active {
        return false;
    }
    on_change(snapshot);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::DocumentStore;
    use crate::write::Write;
    use serde_json::json;

    fn path(p: &str) -> DocumentPath {
        DocumentPath::parse(p).unwrap()
    }

    async fn set_population(store: &MemoryStore, pop: i64) {
        store
            .commit(vec![Write::set(
                path("cities/SF"),
                json!({"population": pop}).as_object().cloned().unwrap(),
            )])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stream_yields_initial_then_changes() {
        let store = MemoryStore::new();
        set_population(&store, 1).await;

        let sf = path("cities/SF");
        let (current, events) = store.listen(&sf).await.unwrap();
        let mut listener = DocumentListener::new(sf.clone(), current, events);

        let first = listener.next().await.unwrap();
        assert_eq!(first.data().unwrap()["population"], json!(1));

        set_population(&store, 2).await;
        let second = listener.next().await.unwrap();
        assert_eq!(second.data().unwrap()["population"], json!(2));
        assert_eq!(second.version(), 2);
    }

    #[tokio::test]
    async fn test_stream_initial_missing_document() {
        let store = MemoryStore::new();
        let sf = path("cities/SF");
        let (current, events) = store.listen(&sf).await.unwrap();
        let mut listener = DocumentListener::new(sf, current, events);

        let first = listener.next().await.unwrap();
        assert!(!first.exists());
    }

    #[tokio::test]
    async fn test_registration_remove() {
        let store = MemoryStore::new();
        let sf = path("cities/SF");
        let (current, events) = store.listen(&sf).await.unwrap();
        let listener = DocumentListener::new(sf.clone(), current, events);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let registration = ListenerRegistration::spawn(sf.clone(), listener, move |snap| {
            let _ = tx.send(snap.version());
        });
        assert!(registration.is_active());
        assert_eq!(registration.path(), &sf);

        assert_eq!(rx.recv().await, Some(0));
        set_population(&store, 1).await;
        assert_eq!(rx.recv().await, Some(1));

        registration.remove();
        assert!(!registration.is_active());
        set_population(&store, 2).await;

        // The task is gone and the sender with it
        assert_eq!(rx.recv().await, None);
    }
}
