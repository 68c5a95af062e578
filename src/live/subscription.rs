//! Subscription handles.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::query::ListenerRegistration;

/// Unique identifier for a subscription.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// State shared by a subscription handle and its pipeline.
///
/// `active` is cleared when the pipeline stops, by error or unsubscribe.
/// `attached` is cleared only by unsubscribe and gates foreground delivery, so
/// a terminal error still reaches the consumer.
pub(crate) struct SubscriptionState {
    id: SubscriptionId,
    active: AtomicBool,
    attached: Arc<AtomicBool>,
    registration: Mutex<Option<ListenerRegistration>>,
}

impl SubscriptionState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: SubscriptionId::new(),
            active: AtomicBool::new(true),
            attached: Arc::new(AtomicBool::new(true)),
            registration: Mutex::new(None),
        })
    }

    pub(crate) const fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn attached_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.attached)
    }

    fn slot(&self) -> MutexGuard<'_, Option<ListenerRegistration>> {
        self.registration
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Store the listener registration, or release it at once if the pipeline
    /// already stopped while the listener was being attached.
    pub(crate) fn hold(&self, registration: ListenerRegistration) {
        let rejected = {
            let mut slot = self.slot();
            if self.is_active() {
                *slot = Some(registration);
                None
            } else {
                Some(registration)
            }
        };
        drop(rejected);
    }

    /// Stop the pipeline and release the listener. Returns true on the first call.
    pub(crate) fn terminate(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        let registration = self.slot().take();
        if let Some(mut registration) = registration {
            registration.remove();
        }
        was_active
    }

    /// Detach the consumer and stop the pipeline.
    pub(crate) fn unsubscribe(&self) -> bool {
        let was_attached = self.attached.swap(false, Ordering::AcqRel);
        self.terminate();
        if was_attached {
            tracing::debug!(subscription = %self.id, "subscription detached");
        }
        was_attached
    }
}

/// Handle to a running subscription.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

impl Subscription {
    pub(crate) fn new(state: Arc<SubscriptionState>) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.state.id()
    }

    /// Release the listener registration and discard accumulated state.
    ///
    /// Idempotent. Emissions already queued on the foreground context are
    /// discarded.
    pub fn unsubscribe(&self) {
        self.state.unsubscribe();
    }

    /// Returns false once the subscription was unsubscribed or terminated by
    /// an error.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Returns true until `unsubscribe` is called.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.state.is_attached()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.state.id())
            .field("active", &self.state.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_registration() -> (ListenerRegistration, Arc<AtomicUsize>) {
        let removed = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&removed);
        let registration = ListenerRegistration::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        (registration, removed)
    }

    #[test]
    fn unsubscribe_releases_registration_once() {
        let state = SubscriptionState::new();
        let (registration, removed) = counting_registration();
        state.hold(registration);

        let sub = Subscription::new(Arc::clone(&state));
        assert!(sub.is_active());
        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert!(!state.attached_flag().load(Ordering::SeqCst));
    }

    #[test]
    fn terminate_keeps_consumer_attached() {
        let state = SubscriptionState::new();
        let (registration, removed) = counting_registration();
        state.hold(registration);

        assert!(state.terminate());
        assert!(!state.terminate());
        assert!(!state.is_active());
        assert!(state.attached_flag().load(Ordering::SeqCst));
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hold_after_terminate_releases_immediately() {
        let state = SubscriptionState::new();
        state.terminate();
        let (registration, removed) = counting_registration();
        state.hold(registration);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
    }
}
