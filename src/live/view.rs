use std::fmt;
use std::sync::Arc;

use crate::error::LiveResult;
use crate::live::operators::Operator;
use crate::live::pipeline::Pipeline;
use crate::live::stream::LiveStream;
use crate::live::subscription::{Subscription, SubscriptionState};
use crate::query::Query;
use crate::schedule::{Outlet, Schedulers};

type OperatorFactory<T> = Arc<dyn Fn() -> Box<dyn Operator<Output = T>> + Send + Sync>;

/// A cold live view.
///
/// Nothing is attached to the query until the view is subscribed. Every
/// subscription gets its own listener, decoder and accumulation state.
pub struct LiveView<T> {
    name: &'static str,
    query: Arc<dyn Query>,
    schedulers: Schedulers,
    operator: OperatorFactory<T>,
}

impl<T> Clone for LiveView<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            query: Arc::clone(&self.query),
            schedulers: self.schedulers.clone(),
            operator: Arc::clone(&self.operator),
        }
    }
}

impl<T: Send + 'static> LiveView<T> {
    pub(crate) fn new<F, O>(name: &'static str, query: Arc<dyn Query>, schedulers: Schedulers, operator: F) -> Self
    where
        F: Fn() -> O + Send + Sync + 'static,
        O: Operator<Output = T> + 'static,
    {
        Self {
            name,
            query,
            schedulers,
            operator: Arc::new(move || Box::new(operator()) as Box<dyn Operator<Output = T>>),
        }
    }

    /// Name of the view, as used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Attach a listener and deliver emissions to `observer` on the foreground
    /// context.
    ///
    /// The observer sees `Ok` values in arrival order; an `Err` is always the
    /// last item. Fails only if the query refuses the listener.
    pub fn subscribe<F>(&self, observer: F) -> LiveResult<Subscription>
    where
        F: FnMut(LiveResult<T>) + Send + 'static,
    {
        let state = SubscriptionState::new();
        let outlet = Outlet::new(
            Arc::clone(self.schedulers.foreground()),
            state.attached_flag(),
            observer,
        );
        let pipeline = Pipeline::new(
            self.name,
            (self.operator)(),
            self.schedulers.gate(outlet),
            Arc::clone(&state),
        );
        let listener = pipeline.into_listener(Arc::clone(self.schedulers.background()));

        let registration = self.query.listen(listener)?;
        state.hold(registration);
        tracing::debug!(
            subscription = %state.id(),
            view = self.name,
            background = self.schedulers.background().name(),
            foreground = self.schedulers.foreground().name(),
            "subscription attached"
        );
        Ok(Subscription::new(state))
    }

    /// Subscribe and buffer emissions in a channel.
    pub fn stream(&self) -> LiveResult<LiveStream<T>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let subscription = self.subscribe(move |item| {
            let _ = tx.send(item);
        })?;
        Ok(LiveStream::new(subscription, rx))
    }
}

impl<T> fmt::Debug for LiveView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveView")
            .field("name", &self.name)
            .field("schedulers", &self.schedulers)
            .finish_non_exhaustive()
    }
}
