//! Stability tracking.
//!
//! Hosts that synchronize on "no pending async work" (test harnesses,
//! server-side rendering) register outstanding work here. The tracker is a
//! shared counter; the stabilization gate waits for it to reach zero before
//! releasing a subscription's first emission.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type StableCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TrackerState {
    pending: usize,
    on_stable: Vec<StableCallback>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<TrackerState>,
    settled: Condvar,
}

/// Shared counter of pending operations.
#[derive(Clone, Default)]
pub struct StabilityTracker {
    shared: Arc<Shared>,
}

impl StabilityTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Mark one operation as outstanding until the guard is dropped.
    #[must_use = "the operation is complete as soon as the guard is dropped"]
    pub fn begin(&self) -> PendingGuard {
        self.state().pending += 1;
        PendingGuard {
            tracker: Some(self.clone()),
        }
    }

    /// Number of outstanding operations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().pending
    }

    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.pending() == 0
    }

    /// Block until stable or until `timeout` elapses. Returns true if stable.
    pub fn wait_stable(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        while state.pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .settled
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Register `callback` to run once the tracker next becomes stable.
    ///
    /// Returns false without storing the callback if the tracker is already
    /// stable; the caller then proceeds directly. The check and registration
    /// are atomic. Callbacks run on the thread that completes the last
    /// outstanding operation, outside the tracker's lock.
    pub(crate) fn register_if_unstable(&self, callback: StableCallback) -> bool {
        let mut state = self.state();
        if state.pending == 0 {
            return false;
        }
        state.on_stable.push(callback);
        true
    }

    fn complete(&self) {
        let callbacks = {
            let mut state = self.state();
            state.pending = state.pending.saturating_sub(1);
            if state.pending > 0 {
                return;
            }
            std::mem::take(&mut state.on_stable)
        };
        self.shared.settled.notify_all();
        if !callbacks.is_empty() {
            tracing::debug!(waiters = callbacks.len(), "host became stable");
        }
        for callback in callbacks {
            callback();
        }
    }
}

impl fmt::Debug for StabilityTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StabilityTracker")
            .field("pending", &self.pending())
            .finish()
    }
}

/// An outstanding operation; completes on drop.
#[derive(Debug)]
pub struct PendingGuard {
    tracker: Option<StabilityTracker>,
}

impl PendingGuard {
    /// Complete the operation now.
    pub fn complete(mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.complete();
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn counts_outstanding_guards() {
        let tracker = StabilityTracker::new();
        assert!(tracker.is_stable());
        let a = tracker.begin();
        let b = tracker.begin();
        assert_eq!(tracker.pending(), 2);
        drop(a);
        assert!(!tracker.is_stable());
        b.complete();
        assert!(tracker.is_stable());
    }

    #[test]
    fn callbacks_fire_once_when_last_guard_completes() {
        let tracker = StabilityTracker::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        assert!(!tracker.register_if_unstable(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        })));

        let a = tracker.begin();
        let b = tracker.begin();
        let f = Arc::clone(&fired);
        assert!(tracker.register_if_unstable(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        })));
        drop(a);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(tracker.begin());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_stable_blocks_until_settled() {
        let tracker = StabilityTracker::new();
        let guard = tracker.begin();
        assert!(!tracker.wait_stable(Duration::from_millis(10)));

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guard);
        });
        assert!(tracker.wait_stable(Duration::from_secs(2)));
        handle.join().unwrap();
    }
}
