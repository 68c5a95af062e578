//! Execution contexts.
//!
//! A context runs submitted tasks one at a time in submission order. The
//! background context is where listener batches are decoded and projected; the
//! foreground context is where consumers observe results.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};

use crate::error::{LiveError, LiveResult};

/// Unit of work submitted to a context.
pub type Task = Box<dyn FnOnce() + Send>;

/// A serial executor.
pub trait ExecutionContext: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Submit a task. Tasks run in submission order, each exactly once.
    fn run(&self, task: Task) -> LiveResult<()>;
}

/// Dedicated worker thread fed by a bounded channel.
///
/// Submission blocks when the queue is full so upstream callers feel
/// backpressure instead of losing batches.
pub struct WorkerContext {
    name: String,
    tx: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerContext {
    /// Spawn the worker thread.
    #[must_use]
    pub fn start(name: impl Into<String>, queue_capacity: usize) -> Self {
        let name = name.into();
        let (tx, rx) = bounded::<Task>(queue_capacity.max(1));
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
            })
            .expect("failed to spawn livequery worker");

        Self {
            name,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }
    }

    fn sender(&self) -> Option<Sender<Task>> {
        self.tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Stop accepting tasks, drain the queue and join the worker.
    ///
    /// Calling this from a task running on the worker itself only closes the
    /// queue; the thread exits once it returns to its loop.
    pub fn shutdown(&self) {
        drop(
            self.tx
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take(),
        );
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl ExecutionContext for WorkerContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, task: Task) -> LiveResult<()> {
        let tx = self.sender().ok_or_else(|| LiveError::disconnected(self.name.clone()))?;
        tx.send(task).map_err(|_| LiveError::disconnected(self.name.clone()))
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext").field("name", &self.name).finish()
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs each task immediately on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineContext;

impl ExecutionContext for InlineContext {
    fn name(&self) -> &str {
        "inline"
    }

    fn run(&self, task: Task) -> LiveResult<()> {
        task();
        Ok(())
    }
}

/// Tasks queue up until the owning thread drains them.
///
/// Models a UI event loop: results reach the consumer only when the host calls
/// `run_pending` / `run_until_idle` on its own thread.
pub struct QueueContext {
    name: String,
    queue: Mutex<VecDeque<Task>>,
    ready: Condvar,
}

impl QueueContext {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Run the tasks queued at the time of the call. Returns how many ran.
    ///
    /// Tasks queued by those tasks wait for the next call.
    pub fn run_pending(&self) -> usize {
        let batch: Vec<Task> = self.queue().drain(..).collect();
        let ran = batch.len();
        for task in batch {
            task();
        }
        ran
    }

    /// Run tasks until the queue stays empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(task) = self.queue().pop_front() else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    /// Block until at least one task is queued or `timeout` elapses, then run
    /// everything queued. Returns how many ran.
    pub fn wait_and_run(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue();
        while queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            queue = self
                .ready
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        }
        drop(queue);
        self.run_until_idle()
    }
}

impl ExecutionContext for QueueContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, task: Task) -> LiveResult<()> {
        self.queue().push_back(task);
        self.ready.notify_all();
        Ok(())
    }
}

impl fmt::Debug for QueueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueContext")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}
