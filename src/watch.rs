//! Change notifications for committed writes.
//!
//! Backends publish one [`WatchEvent`] per document changed by a commit,
//! after the commit is visible to readers. Each subscriber receives the
//! events of a single document.

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::warn;

use crate::document::Document;
use crate::path::DocumentPath;
use crate::write::Change;

/// Type of change that occurred to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Document was created (did not exist before).
    Created,
    /// Document existed and was written again.
    Updated,
    /// Document was deleted.
    Deleted,
}

/// An event representing a committed change to a document.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    /// The document that changed.
    pub path: DocumentPath,
    /// Type of change.
    pub event_type: EventType,
    /// Document before the change (for updates and deletes).
    pub old_document: Option<Document>,
    /// Document after the change (for creates and updates).
    pub document: Option<Document>,
}

impl WatchEvent {
    /// Build the event for a staged change.
    pub fn from_change(change: Change) -> Self {
        let event_type = match (&change.before, &change.after) {
            (None, _) => EventType::Created,
            (Some(_), Some(_)) => EventType::Updated,
            (Some(_), None) => EventType::Deleted,
        };
        Self {
            path: change.path,
            event_type,
            old_document: change.before,
            document: change.after,
        }
    }

    /// Version after the change (0 if deleted).
    pub fn new_version(&self) -> u64 {
        self.document.as_ref().map(|d| d.version).unwrap_or(0)
    }
}

/// A stream of watch events for one document.
pub struct WatchStream {
    inner: BroadcastStream<WatchEvent>,
    path: DocumentPath,
}

impl WatchStream {
    pub fn new(receiver: broadcast::Receiver<WatchEvent>, path: DocumentPath) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            path,
        }
    }
}

impl Stream for WatchStream {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if event.path == self.path {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    // Later events carry the full document, so skipping is safe.
                    warn!(document = %self.path, skipped, "watch stream lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Handle for sending watch events to subscribers.
#[derive(Clone)]
pub struct WatchSender {
    sender: broadcast::Sender<WatchEvent>,
}

impl WatchSender {
    /// Create a new watch sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish every change of a commit, in commit order.
    pub fn publish(&self, changes: Vec<Change>) {
        for change in changes {
            // No subscribers is not an error
            let _ = self.sender.send(WatchEvent::from_change(change));
        }
    }

    pub fn subscribe(&self, path: DocumentPath) -> WatchStream {
        WatchStream::new(self.sender.subscribe(), path)
    }
}

impl Default for WatchSender {
    fn default() -> Self {
        Self::new(1024)
    }
}
