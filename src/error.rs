//! Error types for livequery.
//!
//! All errors are strongly typed using thiserror. Validation failures surface
//! synchronously from the facade; everything else travels down a subscription
//! as a stream error and terminates it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::change::ChangeKind;
use crate::document::DocumentId;

/// Failure reported by the query collaborator (network, auth, permission).
///
/// The core never retries; the error is handed to every affected subscription
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct UpstreamError {
    /// Machine-readable code, e.g. `permission-denied`.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl UpstreamError {
    /// Creates an upstream error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true if the code names a transient condition.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.code.as_str(), "unavailable" | "deadline-exceeded" | "aborted")
    }
}

/// Validation errors raised synchronously by facade calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unknown event kind '{name}', expected one of: added, modified, removed")]
    UnknownEventKind {
        name: String,
    },

    #[error("Id field name cannot be empty")]
    EmptyIdField,

    #[error("Configuration field '{field}' is invalid: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Broken projection invariant.
///
/// Indicates a decoder/maintainer bug or a listener that does not compute
/// indices relative to sequential intra-batch application. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderingViolation {
    #[error("{kind} record at index {index} is outside projection bounds (len {len})")]
    IndexOutOfBounds {
        kind: ChangeKind,
        index: usize,
        len: usize,
    },

    #[error("{kind} record expected '{expected}' at index {index}, found '{found}'")]
    IdentityMismatch {
        kind: ChangeKind,
        index: usize,
        expected: DocumentId,
        found: DocumentId,
    },

    #[error("{kind} record for '{id}' is missing its {which} index")]
    MissingIndex {
        kind: ChangeKind,
        id: DocumentId,
        which: &'static str,
    },
}

/// Execution errors that occur while a subscription or fetch runs.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Upstream listener failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Malformed change at position {position}: {reason}")]
    MalformedChange {
        position: usize,
        reason: String,
    },

    #[error("Failed to deserialize document '{id}': {message}")]
    Deserialize {
        id: DocumentId,
        message: String,
    },

    #[error("Execution context '{path}' disconnected")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Subscription was unsubscribed")]
    Closed,
}

/// Top-level error type for livequery.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Ordering violation: {0}")]
    Ordering(#[from] OrderingViolation),
}

impl From<UpstreamError> for LiveError {
    fn from(err: UpstreamError) -> Self {
        Self::Execution(ExecutionError::Upstream(err))
    }
}

impl LiveError {
    pub(crate) fn disconnected(path: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Disconnected { path: path.into() })
    }

    pub(crate) const fn closed() -> Self {
        Self::Execution(ExecutionError::Closed)
    }

    pub(crate) fn timeout(timeout: std::time::Duration) -> Self {
        Self::Execution(ExecutionError::Timeout {
            duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if the query collaborator reported this error.
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Upstream(_)))
    }

    /// Returns true for programming-contract violations that must not be
    /// treated as data-source failures.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Ordering(_))
    }

    /// Returns the upstream error, if any.
    #[must_use]
    pub const fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Self::Execution(ExecutionError::Upstream(err)) => Some(err),
            _ => None,
        }
    }

    /// Returns true if resubscribing might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Ordering(_) => false,
            Self::Execution(e) => match e {
                ExecutionError::Upstream(up) => up.is_transient(),
                ExecutionError::Timeout { .. } => true,
                _ => false,
            },
        }
    }
}

/// Result type alias for livequery operations.
pub type LiveResult<T> = Result<T, LiveError>;
