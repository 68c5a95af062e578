//! Change decoder.
//!
//! Turns one raw listener batch into an ordered sequence of `ChangeRecord`s,
//! keeping the listener's order. When snapshot metadata changes between two
//! batches, documents whose metadata moved are reported as in-place
//! `Modified` records so consumers see pending-write and cache transitions.

use std::collections::HashMap;

use crate::change::{ChangeKind, ChangeRecord};
use crate::document::{DocumentId, SnapshotMetadata};
use crate::error::{ExecutionError, LiveResult};
use crate::query::{QuerySnapshot, RawDocumentChange};

/// Per-subscription decoder state.
#[derive(Debug, Default)]
pub struct ChangeDecoder {
    prior_metadata: Option<SnapshotMetadata>,
    prior_docs: HashMap<DocumentId, SnapshotMetadata>,
}

impl ChangeDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one batch.
    ///
    /// A malformed batch fails as a whole and leaves the decoder untouched.
    pub fn decode(&mut self, snapshot: &QuerySnapshot) -> LiveResult<Vec<ChangeRecord>> {
        let mut records = snapshot
            .changes
            .iter()
            .enumerate()
            .map(|(position, raw)| decode_change(position, raw))
            .collect::<Result<Vec<_>, _>>()?;

        if self
            .prior_metadata
            .is_some_and(|prior| prior != snapshot.metadata)
        {
            let synthesized = self.metadata_changes(snapshot, &records);
            if !synthesized.is_empty() {
                tracing::trace!(count = synthesized.len(), "synthesized metadata changes");
            }
            records.extend(synthesized);
        }

        self.prior_metadata = Some(snapshot.metadata);
        self.prior_docs = snapshot
            .docs
            .iter()
            .map(|d| (d.id.clone(), d.metadata))
            .collect();

        Ok(records)
    }

    fn metadata_changes(&self, snapshot: &QuerySnapshot, records: &[ChangeRecord]) -> Vec<ChangeRecord> {
        let mut out = Vec::new();
        for (index, current) in snapshot.docs.iter().enumerate() {
            let reported = records.iter().find(|r| r.document.same_identity(current));
            let unchanged = match reported {
                Some(r) => r.document.metadata == current.metadata,
                None => self
                    .prior_docs
                    .get(&current.id)
                    .is_some_and(|prior| *prior == current.metadata),
            };
            if !unchanged {
                out.push(ChangeRecord::modified(current.clone(), index, index));
            }
        }
        out
    }
}

fn decode_index(position: usize, which: &str, raw: i64) -> Result<Option<usize>, ExecutionError> {
    match raw {
        -1 => Ok(None),
        i if i >= 0 => usize::try_from(i).map(Some).map_err(|_| ExecutionError::MalformedChange {
            position,
            reason: format!("{which} index {i} does not fit in usize"),
        }),
        i => Err(ExecutionError::MalformedChange {
            position,
            reason: format!("{which} index {i} is negative"),
        }),
    }
}

fn decode_change(position: usize, raw: &RawDocumentChange) -> Result<ChangeRecord, ExecutionError> {
    let kind: ChangeKind = raw
        .change_type
        .parse()
        .map_err(|_| ExecutionError::MalformedChange {
            position,
            reason: format!("unknown change type '{}'", raw.change_type),
        })?;

    let record = ChangeRecord {
        kind,
        document: raw.doc.clone(),
        old_index: decode_index(position, "old", raw.old_index)?,
        new_index: decode_index(position, "new", raw.new_index)?,
    };

    if !record.is_well_formed() {
        return Err(ExecutionError::MalformedChange {
            position,
            reason: format!(
                "{kind} change for '{}' has inconsistent indices (old {}, new {})",
                raw.doc.id, raw.old_index, raw.new_index
            ),
        });
    }

    Ok(record)
}
