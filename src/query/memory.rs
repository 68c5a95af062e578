//! In-memory query backend.
//!
//! This module provides a thread-safe ordered document set implementing
//! `Query`. It is intended for embedded usage, tests, and as a reference for
//! how a listener must compute change indices.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use serde_json::{Map, Value};

use crate::document::{DocumentId, DocumentSnapshot, SnapshotMetadata};
use crate::error::{LiveResult, UpstreamError};
use crate::query::snapshot::{QuerySnapshot, RawDocumentChange};
use crate::query::traits::{Listener, ListenerRegistration, Query};

/// Sort direction for an ordered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Query ordering. Ties are always broken by document id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    ById,
    ByField {
        field: String,
        direction: Direction,
    },
}

impl SortOrder {
    #[must_use]
    pub fn by_field(field: impl Into<String>, direction: Direction) -> Self {
        Self::ByField {
            field: field.into(),
            direction,
        }
    }

    fn compare(&self, a: &DocumentSnapshot, b: &DocumentSnapshot) -> Ordering {
        match self {
            Self::ById => a.id.cmp(&b.id),
            Self::ByField { field, direction } => {
                let ord = compare_values(a.get(field), b.get(field));
                let ord = match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                };
                ord.then_with(|| a.id.cmp(&b.id))
            }
        }
    }
}

fn type_rank(v: Option<&Value>) -> u8 {
    match v {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(l), Some(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

type SharedListener = Arc<Mutex<Listener>>;

#[derive(Default)]
struct QueryState {
    docs: Vec<DocumentSnapshot>,
    metadata: SnapshotMetadata,
    listeners: BTreeMap<u64, SharedListener>,
    next_listener: u64,
    failed: Option<UpstreamError>,
}

struct Inner {
    order: SortOrder,
    state: Mutex<QueryState>,
    // Held for the whole of a dispatch so listeners observe batches serially
    // and in commit order.
    dispatch: Mutex<()>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, QueryState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn dispatch(&self) -> MutexGuard<'_, ()> {
        self.dispatch.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn detach(&self, id: u64) {
        if self.state().listeners.remove(&id).is_some() {
            tracing::debug!(listener = id, "in-memory query listener detached");
        }
    }
}

fn deliver(listeners: &[SharedListener], result: &Result<QuerySnapshot, UpstreamError>) {
    for listener in listeners {
        let mut listener = listener.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        (*listener)(result.clone());
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    Set(DocumentSnapshot),
    Delete(DocumentId),
}

/// Pending writes applied atomically by `commit`.
#[must_use = "a write batch does nothing until committed"]
pub struct WriteBatch<'a> {
    query: &'a InMemoryQuery,
    ops: Vec<WriteOp>,
}

impl WriteBatch<'_> {
    /// Create or replace a document.
    pub fn set(mut self, id: impl Into<DocumentId>, data: Value) -> Self {
        self.ops.push(WriteOp::Set(DocumentSnapshot::from_value(id, data)));
        self
    }

    /// Create or replace a document from a snapshot.
    pub fn set_doc(mut self, doc: DocumentSnapshot) -> Self {
        self.ops.push(WriteOp::Set(doc));
        self
    }

    /// Delete a document; missing documents are ignored.
    pub fn delete(mut self, id: impl Into<DocumentId>) -> Self {
        self.ops.push(WriteOp::Delete(id.into()));
        self
    }

    /// Apply the writes and notify listeners with one delta batch.
    ///
    /// Returns the number of change records the batch produced. Listeners are
    /// not called for a batch without changes.
    pub fn commit(self) -> Result<usize, UpstreamError> {
        self.query.apply(self.ops)
    }
}

/// Thread-safe in-memory implementation of `Query`.
///
/// Listeners receive the current result set immediately on `listen`, then one
/// delta batch per committed `WriteBatch`. Change indices are computed relative
/// to applying earlier changes of the same batch first.
#[derive(Clone)]
pub struct InMemoryQuery {
    inner: Arc<Inner>,
}

impl Default for InMemoryQuery {
    fn default() -> Self {
        Self::new(SortOrder::ById)
    }
}

impl InMemoryQuery {
    #[must_use]
    pub fn new(order: SortOrder) -> Self {
        Self {
            inner: Arc::new(Inner {
                order,
                state: Mutex::new(QueryState::default()),
                dispatch: Mutex::new(()),
            }),
        }
    }

    /// Query ordered by a payload field.
    #[must_use]
    pub fn ordered_by(field: impl Into<String>, direction: Direction) -> Self {
        Self::new(SortOrder::by_field(field, direction))
    }

    /// Start a write batch.
    pub fn batch(&self) -> WriteBatch<'_> {
        WriteBatch {
            query: self,
            ops: Vec::new(),
        }
    }

    /// Write a single document.
    pub fn set(&self, id: impl Into<DocumentId>, data: Value) -> Result<usize, UpstreamError> {
        self.batch().set(id, data).commit()
    }

    /// Delete a single document.
    pub fn delete(&self, id: impl Into<DocumentId>) -> Result<usize, UpstreamError> {
        self.batch().delete(id).commit()
    }

    /// Change snapshot metadata, e.g. to model the backend confirming cached
    /// results. Every document takes the new metadata and listeners receive a
    /// batch with no changes.
    pub fn set_metadata(&self, metadata: SnapshotMetadata) -> Result<(), UpstreamError> {
        let _dispatch = self.inner.dispatch();
        let (snapshot, listeners) = {
            let mut state = self.inner.state();
            if let Some(err) = &state.failed {
                return Err(err.clone());
            }
            if state.metadata == metadata {
                return Ok(());
            }
            state.metadata = metadata;
            for doc in &mut state.docs {
                doc.metadata = metadata;
            }
            let snapshot = QuerySnapshot {
                docs: state.docs.clone(),
                changes: Vec::new(),
                metadata,
                read_time: Utc::now(),
            };
            (snapshot, state.listeners.values().cloned().collect::<Vec<_>>())
        };
        deliver(&listeners, &Ok(snapshot));
        Ok(())
    }

    /// Deliver a hand-built batch to every listener without touching the
    /// stored documents.
    pub fn emit_raw(&self, snapshot: QuerySnapshot) {
        let _dispatch = self.inner.dispatch();
        let listeners: Vec<_> = self.inner.state().listeners.values().cloned().collect();
        deliver(&listeners, &Ok(snapshot));
    }

    /// Report an upstream failure to every listener and detach them.
    ///
    /// Later `listen` and `fetch` calls fail with the same error.
    pub fn fail(&self, err: UpstreamError) {
        let _dispatch = self.inner.dispatch();
        let listeners: Vec<_> = {
            let mut state = self.inner.state();
            state.failed = Some(err.clone());
            std::mem::take(&mut state.listeners).into_values().collect()
        };
        tracing::debug!(listeners = listeners.len(), code = %err.code, "in-memory query failed");
        deliver(&listeners, &Err(err));
    }

    /// Clear a failure set by `fail`.
    pub fn recover(&self) {
        self.inner.state().failed = None;
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.state().listeners.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state().docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state().docs.is_empty()
    }

    /// Current result set in query order.
    #[must_use]
    pub fn docs(&self) -> Vec<DocumentSnapshot> {
        self.inner.state().docs.clone()
    }

    fn apply(&self, ops: Vec<WriteOp>) -> Result<usize, UpstreamError> {
        let _dispatch = self.inner.dispatch();
        let (snapshot, listeners) = {
            let mut state = self.inner.state();
            if let Some(err) = &state.failed {
                return Err(err.clone());
            }

            let metadata = state.metadata;
            let mut changes = Vec::with_capacity(ops.len());
            for op in ops {
                match op {
                    WriteOp::Set(doc) => {
                        let doc = doc.with_metadata(metadata);
                        let old = state.docs.iter().position(|d| d.same_identity(&doc));
                        if let Some(old) = old {
                            state.docs.remove(old);
                        }
                        let new = self.insertion_point(&state.docs, &doc);
                        state.docs.insert(new, doc.clone());
                        changes.push(match old {
                            Some(old) => RawDocumentChange::modified(doc, old, new),
                            None => RawDocumentChange::added(doc, new),
                        });
                    }
                    WriteOp::Delete(id) => {
                        if let Some(old) = state.docs.iter().position(|d| d.id == id) {
                            let doc = state.docs.remove(old);
                            changes.push(RawDocumentChange::removed(doc, old));
                        }
                    }
                }
            }

            if changes.is_empty() {
                return Ok(0);
            }

            let snapshot = QuerySnapshot {
                docs: state.docs.clone(),
                changes,
                metadata,
                read_time: Utc::now(),
            };
            (snapshot, state.listeners.values().cloned().collect::<Vec<_>>())
        };

        let produced = snapshot.changes.len();
        tracing::trace!(changes = produced, docs = snapshot.docs.len(), "in-memory query commit");
        deliver(&listeners, &Ok(snapshot));
        Ok(produced)
    }

    fn insertion_point(&self, docs: &[DocumentSnapshot], doc: &DocumentSnapshot) -> usize {
        docs.partition_point(|d| self.inner.order.compare(d, doc) == Ordering::Less)
    }
}

impl Query for InMemoryQuery {
    fn listen(&self, listener: Listener) -> LiveResult<ListenerRegistration> {
        let _dispatch = self.inner.dispatch();
        let listener: SharedListener = Arc::new(Mutex::new(listener));

        let (id, initial) = {
            let mut state = self.inner.state();
            if let Some(err) = &state.failed {
                (None, Err(err.clone()))
            } else {
                let id = state.next_listener;
                state.next_listener += 1;
                state.listeners.insert(id, Arc::clone(&listener));
                let initial = QuerySnapshot::initial(state.docs.clone(), state.metadata);
                (Some(id), Ok(initial))
            }
        };

        deliver(std::slice::from_ref(&listener), &initial);

        let Some(id) = id else {
            return Ok(ListenerRegistration::noop());
        };
        tracing::debug!(listener = id, "in-memory query listener attached");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(ListenerRegistration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.detach(id);
            }
        }))
    }

    fn fetch(&self) -> Result<QuerySnapshot, UpstreamError> {
        let state = self.inner.state();
        if let Some(err) = &state.failed {
            return Err(err.clone());
        }
        Ok(QuerySnapshot::initial(state.docs.clone(), state.metadata))
    }
}

/// Builds a JSON object payload from key/value pairs.
#[must_use]
pub fn payload<I, K>(fields: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
