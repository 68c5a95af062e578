//! Foreground delivery and the stabilization gate.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::LiveResult;
use crate::schedule::context::ExecutionContext;
use crate::schedule::stability::StabilityTracker;

type Sink<T> = Arc<Mutex<Box<dyn FnMut(T) + Send>>>;

/// Marshals values into the foreground context for one consumer.
///
/// Each `send` becomes one foreground task. Values still queued when the
/// consumer detaches are discarded.
pub struct Outlet<T> {
    foreground: Arc<dyn ExecutionContext>,
    sink: Sink<T>,
    attached: Arc<AtomicBool>,
}

impl<T: Send + 'static> Outlet<T> {
    pub fn new<F>(foreground: Arc<dyn ExecutionContext>, attached: Arc<AtomicBool>, sink: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self {
            foreground,
            sink: Arc::new(Mutex::new(Box::new(sink))),
            attached,
        }
    }

    /// Queue `value` for delivery on the foreground context.
    pub fn send(&self, value: T) -> LiveResult<()> {
        let sink = Arc::clone(&self.sink);
        let attached = Arc::clone(&self.attached);
        self.foreground.run(Box::new(move || {
            if !attached.load(Ordering::Acquire) {
                return;
            }
            let mut sink = sink.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            (*sink)(value);
        }))
    }

    /// Returns false once the consumer detached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Name of the foreground context.
    #[must_use]
    pub fn context_name(&self) -> &str {
        self.foreground.name()
    }
}

enum GateState<T> {
    Holding { slot: Option<T>, waiting: bool },
    Open,
}

struct GateInner<T> {
    state: Mutex<GateState<T>>,
    outlet: Outlet<T>,
}

impl<T: Send + 'static> GateInner<T> {
    fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn release(&self) {
        let mut state = self.lock();
        let GateState::Holding { slot, .. } = &mut *state else {
            return;
        };
        let value = slot.take();
        *state = GateState::Open;
        let Some(value) = value else {
            return;
        };
        if !self.outlet.is_attached() {
            tracing::trace!(context = self.outlet.context_name(), "held emission dropped after detach");
            return;
        }
        if let Err(err) = self.outlet.send(value) {
            tracing::warn!(%err, "failed to deliver released emission");
        }
    }
}

/// Holds a subscription's first emission until the host is stable.
///
/// While held, later emissions replace the buffered one; on release only the
/// latest is delivered. Once open, emissions pass straight to the outlet.
/// The tracker only keeps a weak reference, so dropping the gate releases the
/// consumer's sink even if the host never becomes stable.
pub struct StabilizationGate<T> {
    inner: Arc<GateInner<T>>,
    tracker: Option<StabilityTracker>,
}

impl<T: Send + 'static> StabilizationGate<T> {
    /// A gate bound to `tracker`.
    #[must_use]
    pub fn new(tracker: StabilityTracker, outlet: Outlet<T>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::Holding {
                    slot: None,
                    waiting: false,
                }),
                outlet,
            }),
            tracker: Some(tracker),
        }
    }

    /// A gate that never holds anything.
    #[must_use]
    pub fn open(outlet: Outlet<T>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::Open),
                outlet,
            }),
            tracker: None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(*self.inner.lock(), GateState::Open)
    }

    /// Returns true while a value is buffered.
    #[must_use]
    pub fn is_holding(&self) -> bool {
        matches!(*self.inner.lock(), GateState::Holding { slot: Some(_), .. })
    }

    /// Pass `value` through the gate.
    pub fn emit(&self, value: T) -> LiveResult<()> {
        let outlet = &self.inner.outlet;
        let mut state = self.inner.lock();
        let GateState::Holding { slot, waiting } = &mut *state else {
            return outlet.send(value);
        };

        *slot = Some(value);
        if *waiting {
            return Ok(());
        }

        let Some(tracker) = &self.tracker else {
            let value = slot.take();
            *state = GateState::Open;
            return value.map_or(Ok(()), |v| outlet.send(v));
        };

        let gate: Weak<GateInner<T>> = Arc::downgrade(&self.inner);
        let release = Box::new(move || {
            if let Some(gate) = gate.upgrade() {
                gate.release();
            }
        });
        if tracker.register_if_unstable(release) {
            tracing::debug!(context = outlet.context_name(), "first emission held until stable");
            *waiting = true;
            return Ok(());
        }

        let value = slot.take();
        *state = GateState::Open;
        value.map_or(Ok(()), |v| outlet.send(v))
    }
}

impl<T> fmt::Debug for StabilizationGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = matches!(
            *self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            GateState::Open
        );
        f.debug_struct("StabilizationGate").field("open", &open).finish()
    }
}
