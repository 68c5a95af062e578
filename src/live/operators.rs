//! Per-view batch operators.
//!
//! Each subscription owns one operator instance. It receives every decoded
//! batch in arrival order and decides whether the batch produces an emission.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::change::{ChangeRecord, EventKinds};
use crate::error::{ExecutionError, LiveResult};
use crate::filter::{filter_non_empty, AuditLog, AuditTrail};
use crate::projection::{Projection, SortedProjection};

/// Turns decoded batches into emissions.
pub(crate) trait Operator: Send {
    type Output: Send + 'static;

    /// Returns `Ok(None)` when the batch produces no emission.
    fn apply(&mut self, batch: Vec<ChangeRecord>) -> LiveResult<Option<Self::Output>>;
}

/// Filtered change batches; empty results are dropped.
pub(crate) struct StateChanges {
    kinds: EventKinds,
}

impl StateChanges {
    pub(crate) const fn new(kinds: EventKinds) -> Self {
        Self { kinds }
    }
}

impl Operator for StateChanges {
    type Output = Vec<ChangeRecord>;

    fn apply(&mut self, batch: Vec<ChangeRecord>) -> LiveResult<Option<Self::Output>> {
        if self.kinds.is_all() {
            return Ok((!batch.is_empty()).then_some(batch));
        }
        Ok(filter_non_empty(&batch, self.kinds))
    }
}

/// Running concatenation of the filtered batches.
pub(crate) struct AuditTrailOp {
    kinds: EventKinds,
    log: AuditLog,
}

impl AuditTrailOp {
    pub(crate) fn new(kinds: EventKinds) -> Self {
        Self {
            kinds,
            log: AuditLog::new(),
        }
    }
}

impl Operator for AuditTrailOp {
    type Output = AuditTrail;

    fn apply(&mut self, batch: Vec<ChangeRecord>) -> LiveResult<Option<Self::Output>> {
        let Some(kept) = filter_non_empty(&batch, self.kinds) else {
            return Ok(None);
        };
        self.log.append(kept);
        Ok(Some(self.log.snapshot()))
    }
}

/// Sorted projection snapshots.
///
/// The first batch always emits, so an empty result set yields an empty
/// projection. Later batches emit only when the projection changed.
pub(crate) struct SnapshotChanges {
    projection: SortedProjection,
    primed: bool,
}

impl SnapshotChanges {
    pub(crate) fn new(kinds: EventKinds) -> Self {
        Self {
            projection: SortedProjection::new(kinds),
            primed: false,
        }
    }

    fn advance(&mut self, batch: &[ChangeRecord]) -> LiveResult<Option<Projection>> {
        let changed = self.projection.apply(batch)?;
        if changed || !self.primed {
            self.primed = true;
            return Ok(Some(self.projection.snapshot()));
        }
        Ok(None)
    }
}

impl Operator for SnapshotChanges {
    type Output = Projection;

    fn apply(&mut self, batch: Vec<ChangeRecord>) -> LiveResult<Option<Self::Output>> {
        self.advance(&batch)
    }
}

/// Plain payloads of the full projection.
pub(crate) struct Values {
    inner: SnapshotChanges,
    id_field: Option<String>,
}

impl Values {
    pub(crate) fn new(id_field: Option<String>) -> Self {
        Self {
            inner: SnapshotChanges::new(EventKinds::all()),
            id_field,
        }
    }
}

impl Operator for Values {
    type Output = Vec<Map<String, Value>>;

    fn apply(&mut self, batch: Vec<ChangeRecord>) -> LiveResult<Option<Self::Output>> {
        let id_field = self.id_field.as_deref();
        Ok(self.inner.advance(&batch)?.map(|projection| {
            projection
                .documents()
                .map(|doc| doc.payload_with_id(id_field))
                .collect()
        }))
    }
}

/// Payloads deserialized into `T`.
pub(crate) struct TypedValues<T> {
    inner: SnapshotChanges,
    id_field: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedValues<T> {
    pub(crate) fn new(id_field: Option<String>) -> Self {
        Self {
            inner: SnapshotChanges::new(EventKinds::all()),
            id_field,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned + Send + 'static> Operator for TypedValues<T> {
    type Output = Vec<T>;

    fn apply(&mut self, batch: Vec<ChangeRecord>) -> LiveResult<Option<Self::Output>> {
        let Some(projection) = self.inner.advance(&batch)? else {
            return Ok(None);
        };
        let id_field = self.id_field.as_deref();
        let values = projection
            .documents()
            .map(|doc| {
                serde_json::from_value(Value::Object(doc.payload_with_id(id_field))).map_err(|err| {
                    ExecutionError::Deserialize {
                        id: doc.id.clone(),
                        message: err.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<T>, _>>()?;
        Ok(Some(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeKind;
    use crate::document::DocumentSnapshot;
    use serde::Deserialize;
    use serde_json::json;

    fn doc(id: &str, n: i64) -> DocumentSnapshot {
        DocumentSnapshot::from_value(id, json!({ "n": n }))
    }

    #[test]
    fn state_changes_drops_empty_batches() {
        let mut op = StateChanges::new(EventKinds::from_kinds(&[ChangeKind::Removed]));
        assert!(op.apply(vec![ChangeRecord::added(doc("a", 1), 0)]).unwrap().is_none());
        assert!(op.apply(Vec::new()).unwrap().is_none());

        let out = op
            .apply(vec![
                ChangeRecord::added(doc("b", 2), 1),
                ChangeRecord::removed(doc("a", 1), 0),
            ])
            .unwrap()
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ChangeKind::Removed);
    }

    #[test]
    fn audit_trail_grows_by_prefix_extension() {
        let mut op = AuditTrailOp::new(EventKinds::all());
        let first = op.apply(vec![ChangeRecord::added(doc("a", 1), 0)]).unwrap().unwrap();
        assert!(op.apply(Vec::new()).unwrap().is_none());
        let second = op
            .apply(vec![ChangeRecord::modified(doc("a", 2), 0, 0)])
            .unwrap()
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert!(second.extends(&first));
    }

    #[test]
    fn snapshot_changes_emits_empty_first_projection() {
        let mut op = SnapshotChanges::new(EventKinds::all());
        let first = op.apply(Vec::new()).unwrap().unwrap();
        assert!(first.is_empty());
        assert!(op.apply(Vec::new()).unwrap().is_none());
    }

    #[test]
    fn snapshot_changes_surfaces_ordering_violation() {
        let mut op = SnapshotChanges::new(EventKinds::all());
        let err = op.apply(vec![ChangeRecord::removed(doc("a", 1), 3)]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn values_overwrite_payload_id_field() {
        let mut op = Values::new(Some("n".to_string()));
        let out = op.apply(vec![ChangeRecord::added(doc("a", 1), 0)]).unwrap().unwrap();
        assert_eq!(out[0].get("n"), Some(&json!("a")));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        key: String,
        n: i64,
    }

    #[test]
    fn typed_values_deserialize_with_id() {
        let mut op = TypedValues::<Item>::new(Some("key".to_string()));
        let out = op.apply(vec![ChangeRecord::added(doc("a", 7), 0)]).unwrap().unwrap();
        assert_eq!(
            out,
            vec![Item {
                key: "a".to_string(),
                n: 7
            }]
        );
    }

    #[test]
    fn typed_values_report_deserialize_failure() {
        let mut op = TypedValues::<Item>::new(None);
        let err = op.apply(vec![ChangeRecord::added(doc("a", 7), 0)]).unwrap_err();
        assert!(format!("{err}").contains("'a'"));
        assert!(!err.is_retryable());
    }
}
