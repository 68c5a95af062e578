use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::change::{ChangeRecord, IntoEventKinds};
use crate::error::{LiveError, LiveResult, ValidationError};
use crate::filter::AuditTrail;
use crate::live::fetch::FetchHandle;
use crate::live::operators::{AuditTrailOp, SnapshotChanges, StateChanges, TypedValues, Values};
use crate::live::view::LiveView;
use crate::projection::Projection;
use crate::query::{Query, QuerySnapshot};
use crate::schedule::Schedulers;

/// Live views over one query.
///
/// Every view method validates its arguments before anything touches the
/// query and returns a cold [`LiveView`].
#[derive(Clone)]
pub struct LiveCollection {
    query: Arc<dyn Query>,
    schedulers: Schedulers,
}

impl LiveCollection {
    #[must_use]
    pub fn new(query: Arc<dyn Query>, schedulers: Schedulers) -> Self {
        Self { query, schedulers }
    }

    #[must_use]
    pub fn schedulers(&self) -> &Schedulers {
        &self.schedulers
    }

    /// Change batches filtered to `kinds`.
    ///
    /// Batches left empty by the filter are not emitted.
    pub fn state_changes(&self, kinds: impl IntoEventKinds) -> LiveResult<LiveView<Vec<ChangeRecord>>> {
        let kinds = kinds.into_event_kinds()?;
        Ok(self.view("state_changes", move || StateChanges::new(kinds)))
    }

    /// Every filtered change since subscription start, growing by appends.
    pub fn audit_trail(&self, kinds: impl IntoEventKinds) -> LiveResult<LiveView<AuditTrail>> {
        let kinds = kinds.into_event_kinds()?;
        Ok(self.view("audit_trail", move || AuditTrailOp::new(kinds)))
    }

    /// Query-ordered projection snapshots.
    ///
    /// Only batches containing one of `kinds` move the projection.
    pub fn snapshot_changes(&self, kinds: impl IntoEventKinds) -> LiveResult<LiveView<Projection>> {
        let kinds = kinds.into_event_kinds()?;
        Ok(self.view("snapshot_changes", move || SnapshotChanges::new(kinds)))
    }

    /// Document payloads in query order.
    ///
    /// With `id_field` set, each payload carries the document id under that
    /// name, overwriting any payload field of the same name.
    pub fn values(&self, id_field: Option<&str>) -> LiveResult<LiveView<Vec<Map<String, Value>>>> {
        let id_field = validate_id_field(id_field)?;
        Ok(self.view("values", move || Values::new(id_field.clone())))
    }

    /// Payloads deserialized into `T`. A payload that does not fit `T`
    /// terminates the subscription.
    pub fn typed_values<T>(&self, id_field: Option<&str>) -> LiveResult<LiveView<Vec<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let id_field = validate_id_field(id_field)?;
        Ok(self.view("typed_values", move || TypedValues::<T>::new(id_field.clone())))
    }

    /// Fetch the result set once.
    ///
    /// The fetch runs on the background context and `callback` receives the
    /// outcome on the foreground context. Independent of every subscription.
    pub fn get<F>(&self, callback: F) -> LiveResult<()>
    where
        F: FnOnce(LiveResult<QuerySnapshot>) + Send + 'static,
    {
        let query = Arc::clone(&self.query);
        let foreground = Arc::clone(self.schedulers.foreground());
        self.schedulers.run_in_background(move || {
            let result = query.fetch().map_err(LiveError::from);
            tracing::debug!(ok = result.is_ok(), "one-shot fetch finished");
            if let Err(err) = foreground.run(Box::new(move || callback(result))) {
                tracing::warn!(%err, "failed to marshal fetch result");
            }
        })
    }

    /// Like [`get`](Self::get) but returns a handle to wait on.
    pub fn get_handle(&self) -> LiveResult<FetchHandle> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.get(move |result| {
            let _ = tx.send(result);
        })?;
        Ok(FetchHandle::new(rx))
    }

    fn view<T, F, O>(&self, name: &'static str, operator: F) -> LiveView<T>
    where
        T: Send + 'static,
        F: Fn() -> O + Send + Sync + 'static,
        O: crate::live::operators::Operator<Output = T> + 'static,
    {
        LiveView::new(name, Arc::clone(&self.query), self.schedulers.clone(), operator)
    }
}

impl fmt::Debug for LiveCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveCollection")
            .field("schedulers", &self.schedulers)
            .finish_non_exhaustive()
    }
}

fn validate_id_field(id_field: Option<&str>) -> Result<Option<String>, ValidationError> {
    match id_field {
        Some(field) if field.trim().is_empty() => Err(ValidationError::EmptyIdField),
        other => Ok(other.map(str::to_string)),
    }
}
