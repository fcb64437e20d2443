//! Collection, document and field addressing.
//!
//! Collection and document paths are slash-separated and alternate between
//! collection ids and document ids:
//!
//! - `cities` is a collection
//! - `cities/SF` is a document
//! - `cities/SF/landmarks` is a collection nested under `cities/SF`
//!
//! Field paths are dot-separated and address nested fields inside a
//! document (`favorites.color`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Result, StoreError};

/// Maximum path length in bytes.
pub const MAX_PATH_LENGTH: usize = 1024;

fn validate_segments(path: &str) -> Result<usize> {
    if path.is_empty() {
        return Err(StoreError::InvalidPath("path cannot be empty".to_string()));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(StoreError::InvalidPath(format!(
            "path exceeds maximum length of {} bytes",
            MAX_PATH_LENGTH
        )));
    }

    let mut count = 0;
    for segment in path.split('/') {
        validate_id(segment).map_err(|_| {
            StoreError::InvalidPath(format!("invalid segment {:?} in {:?}", segment, path))
        })?;
        count += 1;
    }
    Ok(count)
}

/// Validate a single collection or document id.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(StoreError::InvalidPath("id cannot be empty".to_string()));
    }
    if id.contains('/') {
        return Err(StoreError::InvalidPath(format!(
            "id {:?} cannot contain '/'",
            id
        )));
    }
    if id == "." || id == ".." {
        return Err(StoreError::InvalidPath(format!("id {:?} is reserved", id)));
    }
    if id.len() > 4 && id.starts_with("__") && id.ends_with("__") {
        return Err(StoreError::InvalidPath(format!("id {:?} is reserved", id)));
    }
    Ok(())
}

/// Path to a collection: an odd number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Parse and validate a collection path.
    pub fn parse(path: &str) -> Result<Self> {
        let count = validate_segments(path)?;
        if count % 2 == 0 {
            return Err(StoreError::InvalidPath(format!(
                "{:?} addresses a document, not a collection",
                path
            )));
        }
        Ok(Self(path.to_string()))
    }

    /// The last segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The document this collection is nested under, if any.
    pub fn parent(&self) -> Option<DocumentPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| DocumentPath(parent.to_string()))
    }

    /// Address a document in this collection.
    pub fn doc(&self, id: &str) -> Result<DocumentPath> {
        validate_id(id)?;
        Ok(DocumentPath(format!("{}/{}", self.0, id)))
    }

    /// Returns true if `doc` is a direct child of this collection.
    pub fn contains(&self, doc: &DocumentPath) -> bool {
        doc.parent_str() == self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path to a document: an even number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentPath(String);

impl DocumentPath {
    /// Parse and validate a document path.
    pub fn parse(path: &str) -> Result<Self> {
        let count = validate_segments(path)?;
        if count % 2 == 1 {
            return Err(StoreError::InvalidPath(format!(
                "{:?} addresses a collection, not a document",
                path
            )));
        }
        Ok(Self(path.to_string()))
    }

    /// The document id (last segment).
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The collection containing this document.
    pub fn parent(&self) -> CollectionPath {
        CollectionPath(self.parent_str().to_string())
    }

    /// Address a sub-collection nested under this document.
    pub fn collection(&self, id: &str) -> Result<CollectionPath> {
        validate_id(id)?;
        Ok(CollectionPath(format!("{}/{}", self.0, id)))
    }

    fn parent_str(&self) -> &str {
        self.0.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dotted path to a field inside a document, e.g. `favorites.color`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Parse a dotted field path.
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(StoreError::InvalidPath(
                "field path cannot be empty".to_string(),
            ));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(StoreError::InvalidPath(format!(
                "field path {:?} has an empty segment",
                path
            )));
        }
        Ok(Self(segments))
    }

    /// Build a field path from already split segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(StoreError::InvalidPath(
                "field path segments cannot be empty".to_string(),
            ));
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Look up the value at this path.
    pub fn get<'a>(&self, fields: &'a Map<String, Value>) -> Option<&'a Value> {
        let (last, parents) = self.0.split_last()?;
        let mut current = fields;
        for segment in parents {
            current = current.get(segment)?.as_object()?;
        }
        current.get(last)
    }

    /// Write `value` at this path, creating intermediate maps as needed.
    ///
    /// A non-map value sitting on an intermediate segment is replaced.
    /// Sibling fields at every level are left untouched.
    pub fn set(&self, fields: &mut Map<String, Value>, value: Value) {
        let Some((last, parents)) = self.0.split_last() else {
            return;
        };
        let mut current = fields;
        for segment in parents {
            let slot = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = match slot {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.clone(), value);
    }

    /// Remove the value at this path. Returns the removed value, if any.
    pub fn remove(&self, fields: &mut Map<String, Value>) -> Option<Value> {
        let (last, parents) = self.0.split_last()?;
        let mut current = fields;
        for segment in parents {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        current.remove(last)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}
