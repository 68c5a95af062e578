//! Document snapshots and their identity.
//!
//! A `DocumentSnapshot` is an immutable value: an identity field plus an opaque
//! payload. The core never inspects the payload except to inject the identity
//! field for `values` views.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable per-document key.
///
/// Two snapshots describe the same document iff their ids are equal; payload
/// equality is irrelevant.
///
/// # Examples
///
/// ```
/// use livequery::DocumentId;
///
/// let id = DocumentId::new("users/ada");
/// assert_eq!(id.as_str(), "users/ada");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a document id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Freshness flags reported with every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Data was served from a local cache and not yet confirmed by the backend.
    #[serde(default)]
    pub from_cache: bool,
    /// Local writes not yet acknowledged by the backend are reflected.
    #[serde(default)]
    pub has_pending_writes: bool,
}

impl SnapshotMetadata {
    /// Metadata of a fully synchronized snapshot.
    #[must_use]
    pub const fn synced() -> Self {
        Self {
            from_cache: false,
            has_pending_writes: false,
        }
    }
}

/// Immutable document value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Identity field.
    pub id: DocumentId,
    /// Opaque payload.
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: SnapshotMetadata,
}

impl DocumentSnapshot {
    /// Creates a snapshot with synced metadata.
    #[must_use]
    pub fn new(id: impl Into<DocumentId>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
            metadata: SnapshotMetadata::synced(),
        }
    }

    /// Creates a snapshot from any JSON value.
    ///
    /// Non-object values are stored under a single `value` key.
    #[must_use]
    pub fn from_value(id: impl Into<DocumentId>, value: Value) -> Self {
        let data = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self::new(id, data)
    }

    /// Returns a copy with different metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: SnapshotMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns true if both snapshots describe the same document.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.id == other.id
    }

    /// Looks up a top-level payload field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Returns the payload with the identity written under `id_field`.
    ///
    /// An existing payload field of the same name is overwritten.
    #[must_use]
    pub fn payload_with_id(&self, id_field: Option<&str>) -> Map<String, Value> {
        let mut payload = self.data.clone();
        if let Some(field) = id_field {
            payload.insert(field.to_string(), Value::String(self.id.as_str().to_string()));
        }
        payload
    }
}
