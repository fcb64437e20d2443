//! Writes, preconditions and the staging logic shared by every backend.
//!
//! A commit is a list of [`Write`]s applied atomically. Backends load the
//! current state of every touched document, hand it to [`stage`], and
//! persist the resulting [`Change`]s only if staging succeeded.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::document::{Document, Fields};
use crate::error::{Result, StoreError};
use crate::path::{DocumentPath, FieldPath};

/// Value written to a field by an update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Store this value.
    Value(Value),
    /// Store the commit time assigned by the backend.
    ServerTimestamp,
    /// Remove the field.
    Delete,
}

macro_rules! field_value_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::Value(value.into())
                }
            }
        )*
    };
}

field_value_from!(Value, String, &str, bool, i32, i64, u32, u64, f64);

/// Condition a document must satisfy for a write to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    /// Document must exist.
    Exists,
    /// Document must not exist.
    NotExists,
    /// Document must be at exactly this version (0 = missing).
    Version(u64),
}

/// What a write does to its document.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteKind {
    /// Replace the whole field mapping.
    Set(Fields),
    /// Merge the named field paths into the existing mapping.
    Update(Vec<(FieldPath, FieldValue)>),
    /// Remove the document. Nested collections are not touched.
    Delete,
    /// Check the precondition only.
    Verify,
}

/// A single write within a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub path: DocumentPath,
    pub kind: WriteKind,
    pub precondition: Precondition,
}

impl Write {
    /// Create or overwrite a document.
    pub fn set(path: DocumentPath, fields: Fields) -> Self {
        Self {
            path,
            kind: WriteKind::Set(fields),
            precondition: Precondition::None,
        }
    }

    /// Create a document, failing if it already exists.
    pub fn create(path: DocumentPath, fields: Fields) -> Self {
        Self {
            path,
            kind: WriteKind::Set(fields),
            precondition: Precondition::NotExists,
        }
    }

    /// Update fields of an existing document.
    pub fn update(path: DocumentPath, fields: Vec<(FieldPath, FieldValue)>) -> Self {
        Self {
            path,
            kind: WriteKind::Update(fields),
            precondition: Precondition::Exists,
        }
    }

    /// Delete a document. Deleting a missing document succeeds.
    pub fn delete(path: DocumentPath) -> Self {
        Self {
            path,
            kind: WriteKind::Delete,
            precondition: Precondition::None,
        }
    }

    /// Require a document to still be at `version` when the commit applies.
    pub fn verify(path: DocumentPath, version: u64) -> Self {
        Self {
            path,
            kind: WriteKind::Verify,
            precondition: Precondition::Version(version),
        }
    }

    /// Check this write's precondition against the current document.
    pub fn check(&self, current: Option<&Document>) -> Result<()> {
        match (self.precondition, current) {
            (Precondition::None, _) => Ok(()),
            (Precondition::Exists, Some(_)) => Ok(()),
            (Precondition::Exists, None) => Err(StoreError::NotFound(self.path.to_string())),
            (Precondition::NotExists, None) => Ok(()),
            (Precondition::NotExists, Some(_)) => {
                Err(StoreError::AlreadyExists(self.path.to_string()))
            }
            (Precondition::Version(expected), current) => {
                let found = current.map(|d| d.version).unwrap_or(0);
                if found == expected {
                    Ok(())
                } else {
                    Err(StoreError::Conflict {
                        path: self.path.to_string(),
                        expected,
                        found,
                    })
                }
            }
        }
    }

    /// Compute the document after this write, stamped with `version`.
    /// `None` means deleted.
    pub fn apply(
        &self,
        current: Option<&Document>,
        commit_time: SystemTime,
        version: u64,
    ) -> Option<Document> {
        let fields = match &self.kind {
            WriteKind::Verify => return current.cloned(),
            WriteKind::Delete => return None,
            WriteKind::Set(fields) => fields.clone(),
            WriteKind::Update(updates) => {
                let mut fields = current.map(|d| d.fields.clone()).unwrap_or_default();
                for (path, value) in updates {
                    match value {
                        FieldValue::Value(v) => path.set(&mut fields, v.clone()),
                        FieldValue::ServerTimestamp => {
                            path.set(&mut fields, timestamp_value(commit_time))
                        }
                        FieldValue::Delete => {
                            path.remove(&mut fields);
                        }
                    }
                }
                fields
            }
        };

        Some(Document {
            fields,
            version,
            create_time: current.map(|d| d.create_time).unwrap_or(commit_time),
            update_time: commit_time,
        })
    }
}

/// Render a commit time the way server timestamps are stored.
pub fn timestamp_value(time: SystemTime) -> Value {
    let time: DateTime<Utc> = time.into();
    Value::String(time.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Final state of one document touched by a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: DocumentPath,
    pub before: Option<Document>,
    pub after: Option<Document>,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitResult {
    /// Time assigned to every write in the commit.
    pub commit_time: SystemTime,
    /// Version of each written document after its write (0 if deleted).
    pub versions: Vec<u64>,
}

/// Apply `writes` in order on top of `current`.
///
/// `current` must hold the stored state of every path the writes touch.
/// `sequence` is the commit's position in the store-wide sequence and
/// becomes the version of every document written. It must be greater than
/// any version already handed out, so a document deleted and created again
/// never returns to a version a reader has seen.
/// Each write sees the effect of the writes before it. Any failed
/// precondition fails the whole commit. Only documents actually mutated
/// appear in the returned changes.
pub fn stage(
    writes: &[Write],
    current: &BTreeMap<DocumentPath, Option<Document>>,
    commit_time: SystemTime,
    sequence: u64,
) -> Result<(Vec<Change>, CommitResult)> {
    let mut overlay: BTreeMap<&DocumentPath, Option<Document>> = BTreeMap::new();
    let mut touched: Vec<&DocumentPath> = Vec::new();
    let mut versions = Vec::with_capacity(writes.len());

    for write in writes {
        let state = match overlay.get(&write.path) {
            Some(state) => state.clone(),
            None => current.get(&write.path).cloned().flatten(),
        };

        write.check(state.as_ref())?;
        let after = write.apply(state.as_ref(), commit_time, sequence);
        versions.push(after.as_ref().map(|d| d.version).unwrap_or(0));

        if write.kind != WriteKind::Verify && !touched.contains(&&write.path) {
            touched.push(&write.path);
        }
        overlay.insert(&write.path, after);
    }

    let changes = touched
        .into_iter()
        .filter_map(|path| {
            let before = current.get(path).cloned().flatten();
            let after = overlay.remove(path).flatten();
            if before.is_none() && after.is_none() {
                return None;
            }
            Some(Change {
                path: path.clone(),
                before,
                after,
            })
        })
        .collect();

    Ok((
        changes,
        CommitResult {
            commit_time,
            versions,
        },
    ))
}

/// Distinct paths touched by `writes`.
pub fn touched_paths(writes: &[Write]) -> Vec<DocumentPath> {
    let mut paths: Vec<DocumentPath> = writes.iter().map(|w| w.path.clone()).collect();
    paths.sort();
    paths.dedup();
    paths
}
