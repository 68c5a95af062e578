//! Event filtering and audit-trail accumulation.

use std::sync::Arc;

use crate::change::{ChangeRecord, EventKinds};

/// Keeps the records of `batch` whose kind is selected, preserving order.
#[must_use]
pub fn filter_batch(batch: &[ChangeRecord], kinds: EventKinds) -> Vec<ChangeRecord> {
    if kinds.is_all() {
        return batch.to_vec();
    }
    batch.iter().filter(|r| kinds.contains(r.kind)).cloned().collect()
}

/// Filters a batch and drops it entirely if nothing remains.
///
/// Consumers of state changes never observe a zero-length emission.
#[must_use]
pub fn filter_non_empty(batch: &[ChangeRecord], kinds: EventKinds) -> Option<Vec<ChangeRecord>> {
    let kept = filter_batch(batch, kinds);
    (!kept.is_empty()).then_some(kept)
}

/// Append-only concatenation of every batch seen by one subscription.
///
/// Snapshots share storage with the log until the next append, which copies
/// only if a snapshot is still alive.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    records: Arc<Vec<ChangeRecord>>,
    batches: usize,
}

impl AuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch. Empty batches are ignored and return false.
    pub fn append(&mut self, batch: Vec<ChangeRecord>) -> bool {
        if batch.is_empty() {
            return false;
        }
        Arc::make_mut(&mut self.records).extend(batch);
        self.batches += 1;
        true
    }

    /// The full accumulated sequence.
    #[must_use]
    pub fn snapshot(&self) -> AuditTrail {
        AuditTrail(Arc::clone(&self.records))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of non-empty batches appended.
    #[must_use]
    pub const fn batches(&self) -> usize {
        self.batches
    }
}

/// Immutable view of an `AuditLog` at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditTrail(Arc<Vec<ChangeRecord>>);

impl AuditTrail {
    /// Returns true if `self` extends `earlier` without rewriting it.
    #[must_use]
    pub fn extends(&self, earlier: &Self) -> bool {
        self.0.len() >= earlier.0.len() && self.0[..earlier.0.len()] == earlier.0[..]
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<ChangeRecord> {
        self.0.as_ref().clone()
    }
}

impl std::ops::Deref for AuditTrail {
    type Target = [ChangeRecord];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
