//! Per-subscription processing.
//!
//! The listener hands each delivery to the background context, which decodes
//! it, runs the view's operator and passes any emission through the gate to the
//! foreground. The first error terminates the subscription.

use std::sync::{Arc, Mutex};

use crate::decoder::ChangeDecoder;
use crate::error::{LiveError, LiveResult, UpstreamError};
use crate::live::operators::Operator;
use crate::live::subscription::SubscriptionState;
use crate::query::{Listener, QuerySnapshot};
use crate::schedule::{ExecutionContext, StabilizationGate};

pub(crate) struct Pipeline<T> {
    view: &'static str,
    decoder: ChangeDecoder,
    operator: Box<dyn Operator<Output = T>>,
    gate: StabilizationGate<LiveResult<T>>,
    state: Arc<SubscriptionState>,
}

impl<T: Send + 'static> Pipeline<T> {
    pub(crate) fn new(
        view: &'static str,
        operator: Box<dyn Operator<Output = T>>,
        gate: StabilizationGate<LiveResult<T>>,
        state: Arc<SubscriptionState>,
    ) -> Self {
        Self {
            view,
            decoder: ChangeDecoder::new(),
            operator,
            gate,
            state,
        }
    }

    fn process(&mut self, delivery: Result<QuerySnapshot, UpstreamError>) {
        if !self.state.is_active() {
            return;
        }

        let outcome = delivery.map_err(LiveError::from).and_then(|snapshot| {
            let batch = self.decoder.decode(&snapshot)?;
            tracing::debug!(
                subscription = %self.state.id(),
                view = self.view,
                records = batch.len(),
                docs = snapshot.docs.len(),
                "batch decoded"
            );
            self.operator.apply(batch)
        });

        match outcome {
            Ok(None) => {}
            Ok(Some(value)) => {
                if let Err(err) = self.gate.emit(Ok(value)) {
                    tracing::warn!(subscription = %self.state.id(), %err, "failed to marshal emission");
                    self.state.terminate();
                }
            }
            Err(err) => {
                if !self.state.terminate() {
                    return;
                }
                if err.is_fatal() {
                    tracing::error!(subscription = %self.state.id(), view = self.view, %err, "subscription failed");
                } else {
                    tracing::debug!(subscription = %self.state.id(), view = self.view, %err, "subscription failed");
                }
                if let Err(marshal) = self.gate.emit(Err(err)) {
                    tracing::warn!(subscription = %self.state.id(), err = %marshal, "failed to marshal terminal error");
                }
            }
        }
    }

    /// Wrap the pipeline in the listener the query invokes.
    pub(crate) fn into_listener(self, background: Arc<dyn ExecutionContext>) -> Listener {
        let state = Arc::clone(&self.state);
        let pipeline = Arc::new(Mutex::new(self));
        Box::new(move |delivery| {
            if !state.is_active() {
                return;
            }
            let pipeline = Arc::clone(&pipeline);
            let submitted = background.run(Box::new(move || {
                pipeline
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .process(delivery);
            }));
            if let Err(err) = submitted {
                tracing::warn!(subscription = %state.id(), %err, "background context rejected batch");
                state.terminate();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::EventKinds;
    use crate::document::{DocumentSnapshot, SnapshotMetadata};
    use crate::live::operators::StateChanges;
    use crate::query::RawDocumentChange;
    use crate::schedule::{InlineContext, Outlet};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Seen = Arc<Mutex<Vec<LiveResult<Vec<crate::change::ChangeRecord>>>>>;

    fn listener() -> (Listener, Seen, Arc<SubscriptionState>) {
        let state = SubscriptionState::new();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let outlet = Outlet::new(Arc::new(InlineContext), state.attached_flag(), move |v| {
            sink.lock().unwrap().push(v);
        });
        let pipeline = Pipeline::new(
            "test",
            Box::new(StateChanges::new(EventKinds::all())),
            StabilizationGate::open(outlet),
            Arc::clone(&state),
        );
        (pipeline.into_listener(Arc::new(InlineContext)), seen, state)
    }

    fn snapshot(changes: Vec<RawDocumentChange>) -> QuerySnapshot {
        QuerySnapshot {
            docs: Vec::new(),
            changes,
            metadata: SnapshotMetadata::synced(),
            read_time: Utc::now(),
        }
    }

    #[test]
    fn upstream_error_terminates_after_one_emission() {
        let (mut listener, seen, state) = listener();
        let removed = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&removed);
        state.hold(crate::query::ListenerRegistration::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));

        listener(Err(UpstreamError::new("permission-denied", "nope")));
        listener(Err(UpstreamError::new("unavailable", "again")));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let err = seen[0].as_ref().unwrap_err();
        assert_eq!(err.upstream().map(|e| e.code.as_str()), Some("permission-denied"));
        assert!(!state.is_active());
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_batch_terminates_subscription() {
        let (mut listener, seen, state) = listener();
        let mut bad = RawDocumentChange::added(DocumentSnapshot::from_value("a", json!({})), 0);
        bad.change_type = "renamed".to_string();
        listener(Ok(snapshot(vec![bad])));
        listener(Ok(snapshot(vec![RawDocumentChange::added(
            DocumentSnapshot::from_value("b", json!({})),
            0,
        )])));

        assert!(!state.is_active());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_err());
    }
}
