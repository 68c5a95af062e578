//! Sorted projection maintainer.
//!
//! Keeps an in-memory array equal to "the query results in query order" by
//! applying index-addressed inserts and deletes, never re-sorting. Records of a
//! batch must be applied strictly in the order given: each index is relative to
//! the array after every earlier record of the batch has been applied.
//!
//! With every kind requested the maintainer is strict and any record that does
//! not line up with the current array is an `OrderingViolation`. With a subset
//! requested some records are never applied, so positions drift; the maintainer
//! then skips records it cannot place rather than failing.
//!
//! The array stays unique by document id in both modes. A record for an id that
//! already sits elsewhere moves that entry: last write wins at the given index.

use std::ops::Deref;
use std::sync::Arc;

use crate::change::{ChangeKind, ChangeRecord, EventKinds};
use crate::document::{DocumentId, DocumentSnapshot};
use crate::error::OrderingViolation;

/// Immutable snapshot of the projection.
///
/// Each entry is the last change that placed the document at its position.
/// Snapshots never alias later emissions: the maintainer copies the array on
/// its next write only while a snapshot is still alive.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection(Arc<Vec<ChangeRecord>>);

impl Projection {
    /// Documents in query order.
    pub fn documents(&self) -> impl Iterator<Item = &DocumentSnapshot> {
        self.0.iter().map(|r| &r.document)
    }

    /// Ids in query order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.0.iter().map(|r| r.document.id.as_str()).collect()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<ChangeRecord> {
        self.0.as_ref().clone()
    }
}

impl Deref for Projection {
    type Target = [ChangeRecord];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Per-subscription projection state.
#[derive(Debug, Default)]
pub struct SortedProjection {
    entries: Arc<Vec<ChangeRecord>>,
    kinds: EventKinds,
}

impl SortedProjection {
    /// Empty projection applying the given kinds.
    #[must_use]
    pub fn new(kinds: EventKinds) -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            kinds,
        }
    }

    #[must_use]
    pub const fn kinds(&self) -> EventKinds {
        self.kinds
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> Projection {
        Projection(Arc::clone(&self.entries))
    }

    /// Apply one batch in order. Returns true if the projection changed.
    ///
    /// Records of unrequested kinds are skipped. On an ordering violation the
    /// projection is left as it was before the batch.
    pub fn apply(&mut self, batch: &[ChangeRecord]) -> Result<bool, OrderingViolation> {
        if !self.kinds.intersects(batch) {
            return Ok(false);
        }

        let kinds = self.kinds;
        let strict = kinds.is_all();
        let mut journal = Journal::new(Arc::make_mut(&mut self.entries));
        let mut changed = false;
        for record in batch.iter().filter(|r| kinds.contains(r.kind)) {
            match apply_record(&mut journal, record, strict) {
                Ok(applied) => changed |= applied,
                Err(violation) => {
                    tracing::error!(%violation, "projection ordering violation");
                    journal.rollback();
                    return Err(violation);
                }
            }
        }
        Ok(changed)
    }

    /// Apply a batch and return the new snapshot if anything changed.
    pub fn apply_and_snapshot(&mut self, batch: &[ChangeRecord]) -> Result<Option<Projection>, OrderingViolation> {
        Ok(self.apply(batch)?.then(|| self.snapshot()))
    }
}

enum Undo {
    Remove(usize),
    Insert(usize, ChangeRecord),
    Replace(usize, ChangeRecord),
}

/// Mutations of one batch, recorded so a violation can restore the array.
struct Journal<'a> {
    entries: &'a mut Vec<ChangeRecord>,
    undo: Vec<Undo>,
}

impl<'a> Journal<'a> {
    fn new(entries: &'a mut Vec<ChangeRecord>) -> Self {
        Self {
            entries,
            undo: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn at(&self, index: usize) -> Option<&DocumentSnapshot> {
        self.entries.get(index).map(|r| &r.document)
    }

    fn position(&self, id: &DocumentId) -> Option<usize> {
        self.entries.iter().position(|r| r.document.id == *id)
    }

    fn insert(&mut self, index: usize, record: ChangeRecord) {
        self.entries.insert(index, record);
        self.undo.push(Undo::Remove(index));
    }

    fn remove(&mut self, index: usize) {
        let old = self.entries.remove(index);
        self.undo.push(Undo::Insert(index, old));
    }

    fn replace(&mut self, index: usize, record: ChangeRecord) {
        let old = std::mem::replace(&mut self.entries[index], record);
        self.undo.push(Undo::Replace(index, old));
    }

    fn rollback(mut self) {
        for step in self.undo.into_iter().rev() {
            match step {
                Undo::Remove(index) => {
                    self.entries.remove(index);
                }
                Undo::Insert(index, record) => self.entries.insert(index, record),
                Undo::Replace(index, record) => self.entries[index] = record,
            }
        }
    }
}

fn out_of_bounds(kind: ChangeKind, index: usize, len: usize) -> OrderingViolation {
    OrderingViolation::IndexOutOfBounds { kind, index, len }
}

fn mismatch(record: &ChangeRecord, index: usize, found: &DocumentSnapshot) -> OrderingViolation {
    OrderingViolation::IdentityMismatch {
        kind: record.kind,
        index,
        expected: record.document.id.clone(),
        found: found.id.clone(),
    }
}

/// Drop an existing entry for the record's id before it is placed again.
/// Returns true if one was dropped.
fn evict_duplicate(journal: &mut Journal<'_>, record: &ChangeRecord) -> bool {
    let Some(existing) = journal.position(&record.document.id) else {
        return false;
    };
    tracing::warn!(id = %record.document.id, existing, "duplicate id moved, last write wins");
    journal.remove(existing);
    true
}

fn apply_record(journal: &mut Journal<'_>, record: &ChangeRecord, strict: bool) -> Result<bool, OrderingViolation> {
    tracing::trace!(
        kind = %record.kind,
        id = %record.document.id,
        old = ?record.old_index,
        new = ?record.new_index,
        "apply change"
    );
    match record.kind {
        ChangeKind::Added => {
            let new = record.require_new()?;
            if journal.at(new).is_some_and(|d| d.same_identity(&record.document)) {
                journal.replace(new, record.clone());
                return Ok(true);
            }
            // Eviction shrinks the array, so the index is clamped afterwards.
            let evicted = evict_duplicate(journal, record);
            if new <= journal.len() {
                journal.insert(new, record.clone());
            } else if strict && !evicted {
                return Err(out_of_bounds(record.kind, new, journal.len()));
            } else {
                let end = journal.len();
                journal.insert(end, record.clone());
            }
            Ok(true)
        }
        ChangeKind::Removed => {
            let old = record.require_old()?;
            match journal.at(old) {
                Some(d) if d.same_identity(&record.document) => {
                    journal.remove(old);
                    Ok(true)
                }
                Some(d) if strict => Err(mismatch(record, old, d)),
                None if strict => Err(out_of_bounds(record.kind, old, journal.len())),
                _ => {
                    tracing::warn!(id = %record.document.id, old, "skipping removal that does not line up");
                    Ok(false)
                }
            }
        }
        ChangeKind::Modified => {
            let old = record.require_old()?;
            let new = record.require_new()?;
            match journal.at(old) {
                Some(d) if d.same_identity(&record.document) => {
                    if old == new {
                        journal.replace(old, record.clone());
                    } else {
                        journal.remove(old);
                        if new <= journal.len() {
                            journal.insert(new, record.clone());
                        } else if strict {
                            return Err(out_of_bounds(record.kind, new, journal.len()));
                        } else {
                            let end = journal.len();
                            journal.insert(end, record.clone());
                        }
                    }
                    Ok(true)
                }
                Some(d) if strict => Err(mismatch(record, old, d)),
                None if strict => Err(out_of_bounds(record.kind, old, journal.len())),
                slot => {
                    let present = journal.position(&record.document.id).is_some();
                    if slot.is_some() && !present {
                        tracing::warn!(id = %record.document.id, old, "skipping modification that does not line up");
                        return Ok(false);
                    }
                    let _ = evict_duplicate(journal, record);
                    let at = new.min(journal.len());
                    journal.insert(at, record.clone());
                    Ok(true)
                }
            }
        }
    }
}
