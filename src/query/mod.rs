//! Query collaborator interface.
//!
//! The core consumes queries only through the `Query` trait. An in-memory
//! implementation is provided for embedded use and tests.

mod memory;
mod snapshot;
mod traits;

pub use memory::{payload, Direction, InMemoryQuery, SortOrder, WriteBatch};
pub use snapshot::{QuerySnapshot, RawDocumentChange};
pub use traits::{Listener, ListenerRegistration, Query};
