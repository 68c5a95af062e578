//! Raw delta batches as delivered by a query listener.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{DocumentId, DocumentSnapshot, SnapshotMetadata};

/// Untyped per-document change in the listener's wire form.
///
/// `change_type` is one of `added`/`modified`/`removed`; indices use `-1` for
/// "not present". The decoder turns these into typed `ChangeRecord`s.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDocumentChange {
    #[serde(rename = "type")]
    pub change_type: String,
    pub doc: DocumentSnapshot,
    pub old_index: i64,
    pub new_index: i64,
}

impl RawDocumentChange {
    #[must_use]
    pub fn added(doc: DocumentSnapshot, new_index: usize) -> Self {
        Self {
            change_type: "added".to_string(),
            doc,
            old_index: -1,
            new_index: to_wire(new_index),
        }
    }

    #[must_use]
    pub fn modified(doc: DocumentSnapshot, old_index: usize, new_index: usize) -> Self {
        Self {
            change_type: "modified".to_string(),
            doc,
            old_index: to_wire(old_index),
            new_index: to_wire(new_index),
        }
    }

    #[must_use]
    pub fn removed(doc: DocumentSnapshot, old_index: usize) -> Self {
        Self {
            change_type: "removed".to_string(),
            doc,
            old_index: to_wire(old_index),
            new_index: -1,
        }
    }
}

fn to_wire(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

/// One listener callback's worth of data: the delta batch.
///
/// `docs` is the full query-ordered result set after `changes` are applied.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySnapshot {
    pub docs: Vec<DocumentSnapshot>,
    #[serde(default)]
    pub changes: Vec<RawDocumentChange>,
    #[serde(default)]
    pub metadata: SnapshotMetadata,
    pub read_time: DateTime<Utc>,
}

impl QuerySnapshot {
    /// A snapshot of `docs` whose changes are all additions, as a listener
    /// reports the first result set.
    #[must_use]
    pub fn initial(docs: Vec<DocumentSnapshot>, metadata: SnapshotMetadata) -> Self {
        let changes = docs
            .iter()
            .enumerate()
            .map(|(i, d)| RawDocumentChange::added(d.clone(), i))
            .collect();
        Self {
            docs,
            changes,
            metadata,
            read_time: Utc::now(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Position of a document in the result set.
    #[must_use]
    pub fn position(&self, id: &DocumentId) -> Option<usize> {
        self.docs.iter().position(|d| &d.id == id)
    }
}
