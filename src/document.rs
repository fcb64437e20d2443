//! Stored documents and the snapshots handed to callers.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::SystemTime;

use crate::error::Result;
use crate::path::{DocumentPath, FieldPath};

/// Field mapping held by a document.
pub type Fields = Map<String, Value>;

/// A stored document with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The field mapping.
    pub fields: Fields,
    /// Sequence number of the commit that last wrote this document.
    /// Strictly increases across writes, including a delete and re-create.
    pub version: u64,
    /// When the document was created.
    pub create_time: SystemTime,
    /// When the document was last written.
    pub update_time: SystemTime,
}

impl Document {
    /// Deserialize the field mapping into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(Into::into)
    }
}

/// State of a document at a point in time. `document` is `None` when the
/// document does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    pub document: Option<Document>,
}

impl DocumentSnapshot {
    pub fn new(path: DocumentPath, document: Option<Document>) -> Self {
        Self { path, document }
    }

    pub fn missing(path: DocumentPath) -> Self {
        Self {
            path,
            document: None,
        }
    }

    /// The document id.
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn exists(&self) -> bool {
        self.document.is_some()
    }

    /// The field mapping, if the document exists.
    pub fn data(&self) -> Option<&Fields> {
        self.document.as_ref().map(|d| &d.fields)
    }

    /// Version of the document, 0 if it does not exist.
    pub fn version(&self) -> u64 {
        self.document.as_ref().map(|d| d.version).unwrap_or(0)
    }

    /// Look up a (possibly nested) field.
    pub fn get(&self, field: &FieldPath) -> Option<&Value> {
        self.data().and_then(|fields| field.get(fields))
    }

    /// Deserialize the document into a typed value. `None` if missing.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.document.as_ref().map(Document::data_as).transpose()
    }
}
