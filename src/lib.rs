//! # livequery - live, query-ordered views over document change streams
//!
//! A query listener reports add/modify/remove deltas for documents in its
//! result set. livequery turns that stream into:
//!
//! - **state changes**: ordered change batches, filtered by event kind
//! - **audit trail**: the growing concatenation of every filtered batch
//! - **snapshot changes**: a projection that always equals the query results
//!   in query order, maintained incrementally from change indices
//! - **values**: the projection's payloads, optionally carrying the document id
//!
//! Per-batch work runs on a background execution context and every result is
//! handed to the consumer on a foreground context. A stabilization gate holds
//! each subscription's first emission until the host reports no pending work.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use livequery::{InMemoryQuery, LiveCollection, Schedulers};
//! use serde_json::json;
//!
//! let query = InMemoryQuery::ordered_by("rank", livequery::Direction::Ascending);
//! let live = LiveCollection::new(Arc::new(query.clone()), Schedulers::default());
//!
//! let stream = live.snapshot_changes(["added", "removed"])?.stream()?;
//! query.set("a", json!({"rank": 1}))?;
//! let projection = stream.recv()?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod change;
pub mod document;
pub mod error;

// Reconciliation core
pub mod decoder;
pub mod filter;
pub mod projection;

// Collaborators and runtime
pub mod config;
pub mod query;
pub mod schedule;

// Facade
pub mod live;

pub use change::{ChangeKind, ChangeRecord, EventKinds, IntoEventKinds};
pub use config::LiveConfig;
pub use decoder::ChangeDecoder;
pub use document::{DocumentId, DocumentSnapshot, SnapshotMetadata};
pub use error::{ExecutionError, LiveError, LiveResult, OrderingViolation, UpstreamError, ValidationError};
pub use filter::{filter_batch, AuditLog, AuditTrail};
pub use live::{FetchHandle, LiveCollection, LiveStream, LiveView, Subscription, SubscriptionId};
pub use projection::{Projection, SortedProjection};
pub use query::{
    payload, Direction, InMemoryQuery, ListenerRegistration, Query, QuerySnapshot, RawDocumentChange, SortOrder,
    WriteBatch,
};
pub use schedule::{
    ExecutionContext, InlineContext, PendingGuard, QueueContext, Schedulers, StabilityTracker, WorkerContext,
};
#[cfg(feature = "tokio")]
pub use schedule::TokioContext;
