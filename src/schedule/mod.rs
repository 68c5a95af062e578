//! Scheduling boundary.
//!
//! Listener callbacks, decoding and projection run on the background context so
//! per-batch work never triggers host refresh cycles. Every result crosses into
//! the foreground context exactly once, in arrival order. A stabilization gate
//! can hold each subscription's first result until the host settles.

use std::fmt;
use std::sync::Arc;

use crate::config::LiveConfig;
use crate::error::LiveResult;

/// Serial executors.
pub mod context;
/// First-emission gate and foreground delivery.
pub mod gate;
/// Pending-work tracking.
pub mod stability;
#[cfg(feature = "tokio")]
/// Tokio-backed context.
pub mod tokio_context;

pub use context::{ExecutionContext, InlineContext, QueueContext, Task, WorkerContext};
pub use gate::{Outlet, StabilizationGate};
pub use stability::{PendingGuard, StabilityTracker};
#[cfg(feature = "tokio")]
pub use tokio_context::TokioContext;

/// The two named contexts plus the host's stability tracker.
#[derive(Clone)]
pub struct Schedulers {
    background: Arc<dyn ExecutionContext>,
    foreground: Arc<dyn ExecutionContext>,
    stability: StabilityTracker,
    gate_enabled: bool,
}

impl Schedulers {
    /// Schedulers over explicit contexts with a fresh tracker and the gate on.
    #[must_use]
    pub fn new(background: Arc<dyn ExecutionContext>, foreground: Arc<dyn ExecutionContext>) -> Self {
        Self {
            background,
            foreground,
            stability: StabilityTracker::new(),
            gate_enabled: true,
        }
    }

    /// Two dedicated worker threads configured by `config`.
    pub fn from_config(config: &LiveConfig) -> LiveResult<Self> {
        config.validate()?;
        let background = WorkerContext::start(
            config.background_thread_name.clone(),
            config.background_queue_capacity,
        );
        let foreground = WorkerContext::start(
            config.foreground_thread_name.clone(),
            config.foreground_queue_capacity,
        );
        Ok(Self::new(Arc::new(background), Arc::new(foreground)).with_gate(config.stabilization_gate))
    }

    /// Both contexts inline on the calling thread.
    #[must_use]
    pub fn inline() -> Self {
        Self::new(Arc::new(InlineContext), Arc::new(InlineContext))
    }

    /// Share a tracker owned by the host.
    #[must_use]
    pub fn with_stability(mut self, tracker: StabilityTracker) -> Self {
        self.stability = tracker;
        self
    }

    #[must_use]
    pub fn with_gate(mut self, enabled: bool) -> Self {
        self.gate_enabled = enabled;
        self
    }

    #[must_use]
    pub fn background(&self) -> &Arc<dyn ExecutionContext> {
        &self.background
    }

    #[must_use]
    pub fn foreground(&self) -> &Arc<dyn ExecutionContext> {
        &self.foreground
    }

    #[must_use]
    pub fn stability(&self) -> &StabilityTracker {
        &self.stability
    }

    #[must_use]
    pub const fn gate_enabled(&self) -> bool {
        self.gate_enabled
    }

    /// Run `task` on the background context.
    pub fn run_in_background<F>(&self, task: F) -> LiveResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.background.run(Box::new(task))
    }

    /// Run `task` on the foreground context.
    pub fn run_in_foreground<F>(&self, task: F) -> LiveResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.foreground.run(Box::new(task))
    }

    /// A gate for one subscriber, open if gating is disabled.
    pub(crate) fn gate<T: Send + 'static>(&self, outlet: Outlet<T>) -> StabilizationGate<T> {
        if self.gate_enabled {
            StabilizationGate::new(self.stability.clone(), outlet)
        } else {
            StabilizationGate::open(outlet)
        }
    }
}

impl Default for Schedulers {
    /// Worker-thread schedulers with the default configuration.
    fn default() -> Self {
        let config = LiveConfig::default();
        Self::new(
            Arc::new(WorkerContext::start(
                config.background_thread_name,
                config.background_queue_capacity,
            )),
            Arc::new(WorkerContext::start(
                config.foreground_thread_name,
                config.foreground_queue_capacity,
            )),
        )
    }
}

impl fmt::Debug for Schedulers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedulers")
            .field("background", &self.background.name())
            .field("foreground", &self.foreground.name())
            .field("stability", &self.stability)
            .field("gate_enabled", &self.gate_enabled)
            .finish()
    }
}
