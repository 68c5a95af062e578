//! Live views over a query.
//!
//! `LiveCollection` composes the decoder, the filter and aggregator, and the
//! sorted projection into per-subscription pipelines that run on the background
//! context and deliver on the foreground context.

/// View factory over one query.
pub mod collection;
/// One-shot fetch handle.
pub mod fetch;
mod operators;
mod pipeline;
/// Channel-backed subscriber stream.
pub mod stream;
/// Subscription handles and ids.
pub mod subscription;
/// Cold views.
pub mod view;

pub use collection::LiveCollection;
pub use fetch::FetchHandle;
pub use stream::LiveStream;
pub use subscription::{Subscription, SubscriptionId};
pub use view::LiveView;
