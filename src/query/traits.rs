//! Contract between the core and the query collaborator.
//!
//! A query owns the network listener. The core only needs to attach a listener
//! that receives delta batches over time and to run a one-shot fetch.

use std::fmt;

use crate::error::{LiveResult, UpstreamError};
use crate::query::snapshot::QuerySnapshot;

/// Callback receiving delta batches.
///
/// Implementations of `Query` must invoke a listener serially: no two calls for
/// the same registration may overlap.
pub type Listener = Box<dyn FnMut(Result<QuerySnapshot, UpstreamError>) + Send>;

/// Source of live results.
pub trait Query: Send + Sync {
    /// Attach a listener. It is detached when the returned registration is
    /// removed or dropped.
    fn listen(&self, listener: Listener) -> LiveResult<ListenerRegistration>;

    /// Fetch the current result set once.
    fn fetch(&self) -> Result<QuerySnapshot, UpstreamError>;
}

/// Handle that detaches a listener.
///
/// Removal is idempotent; dropping the handle removes the listener.
pub struct ListenerRegistration {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    /// Wraps a detach action.
    pub fn new<F>(detach: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A registration with nothing to detach.
    #[must_use]
    pub fn noop() -> Self {
        Self { detach: None }
    }

    /// Detach the listener now.
    pub fn remove(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }

    /// Returns true if the listener has not been detached yet.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.detach.is_some()
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.remove();
    }
}
