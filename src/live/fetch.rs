use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::{LiveError, LiveResult};
use crate::query::QuerySnapshot;

/// Pending one-shot fetch.
///
/// The result is handed over on the foreground context, so joining from the
/// thread that drains a queued foreground context would wait forever.
#[derive(Debug)]
pub struct FetchHandle {
    rx: Receiver<LiveResult<QuerySnapshot>>,
}

impl FetchHandle {
    pub(crate) fn new(rx: Receiver<LiveResult<QuerySnapshot>>) -> Self {
        Self { rx }
    }

    /// Block until the fetch completes.
    pub fn join(self) -> LiveResult<QuerySnapshot> {
        self.rx.recv().map_err(|_| LiveError::disconnected("fetch"))?
    }

    /// Block until the fetch completes or `timeout` elapses.
    ///
    /// On timeout the handle is returned so the caller can keep waiting.
    pub fn join_timeout(self, timeout: Duration) -> Result<LiveResult<QuerySnapshot>, Self> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(LiveError::disconnected("fetch"))),
        }
    }

    /// Returns the result if it has already arrived.
    pub fn try_join(&self) -> Option<LiveResult<QuerySnapshot>> {
        self.rx.try_recv().ok()
    }
}
