//! Execution context backed by a tokio runtime.

use std::fmt;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use crate::error::{LiveError, LiveResult};
use crate::schedule::context::{ExecutionContext, Task};

/// Runs tasks sequentially on a single task spawned onto a runtime.
///
/// Tasks are synchronous and should be short; they occupy a runtime worker
/// while they run.
pub struct TokioContext {
    name: String,
    tx: UnboundedSender<Task>,
}

impl TokioContext {
    /// Spawn the drain task on `handle`.
    #[must_use]
    pub fn spawn(name: impl Into<String>, handle: &Handle) -> Self {
        let (tx, mut rx) = unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
        });
        Self { name: name.into(), tx }
    }

    /// Spawn on the runtime of the calling thread.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn current(name: impl Into<String>) -> Self {
        Self::spawn(name, &Handle::current())
    }
}

impl ExecutionContext for TokioContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, task: Task) -> LiveResult<()> {
        self.tx
            .send(task)
            .map_err(|_| LiveError::disconnected(self.name.clone()))
    }
}

impl fmt::Debug for TokioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioContext").field("name", &self.name).finish()
    }
}
