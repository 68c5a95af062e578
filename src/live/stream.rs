use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{LiveError, LiveResult};

use super::subscription::{Subscription, SubscriptionId};

/// A subscription whose emissions are buffered in a channel.
///
/// Items are pushed by the foreground context. Dropping the stream
/// unsubscribes.
#[derive(Debug)]
pub struct LiveStream<T> {
    subscription: Subscription,
    rx: Receiver<LiveResult<T>>,
}

impl<T> LiveStream<T> {
    pub(crate) fn new(subscription: Subscription, rx: Receiver<LiveResult<T>>) -> Self {
        Self { subscription, rx }
    }

    /// The subscription id backing this stream.
    #[must_use]
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    /// Returns false once the subscription stopped producing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }

    /// Explicit unsubscription. Idempotent.
    ///
    /// Items already buffered stay readable; afterwards every receive fails
    /// with `ExecutionError::Closed`.
    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }

    /// Receive the next emission (blocking).
    ///
    /// A stream error is returned as `Err` and is the last item.
    pub fn recv(&self) -> LiveResult<T> {
        if !self.subscription.is_attached() {
            return self.buffered_or_closed();
        }
        self.rx.recv().map_err(|_| self.ended())?
    }

    /// Receive the next emission with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> LiveResult<T> {
        if !self.subscription.is_attached() {
            return self.buffered_or_closed();
        }
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => LiveError::timeout(timeout),
            RecvTimeoutError::Disconnected => self.ended(),
        })?
    }

    /// Receive a buffered emission without blocking.
    ///
    /// Returns `None` if nothing is buffered yet.
    pub fn try_recv(&self) -> Option<LiveResult<T>> {
        if !self.subscription.is_attached() {
            return Some(self.buffered_or_closed());
        }
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.ended())),
        }
    }

    fn buffered_or_closed(&self) -> LiveResult<T> {
        self.rx.try_recv().unwrap_or_else(|_| Err(LiveError::closed()))
    }

    fn ended(&self) -> LiveError {
        if self.subscription.is_attached() {
            LiveError::disconnected("live_stream")
        } else {
            LiveError::closed()
        }
    }
}
