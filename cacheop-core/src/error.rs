//! Error types for the reconciliation engine.

use std::time::Duration;

use thiserror::Error;

/// Errors from the resource-scoped metadata store backing the
/// last-requested record.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure (I/O, database, serialization).
    #[error("metadata store: {0}")]
    Backend(String),
}

/// Errors from the remote control-plane API client.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource is mid-transition and cannot accept the call.
    #[error("busy: {0}")]
    Busy(String),

    /// The remote rejected the request as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transport-level failure, propagated unchanged.
    #[error("transport: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors surfaced by the reconciler's public operations.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Remote resource absent; surfaced as-is.
    #[error("not found: {0}")]
    NotFound(String),

    /// The pass cannot proceed yet; re-invoke after the given delay.
    #[error("retry after {after:?}: {reason}")]
    RetryAfter { reason: String, after: Duration },

    /// Caller-side validation failure, detected before any remote call.
    /// Never retried; identical input fails identically.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A previously accepted asynchronous change failed server-side.
    /// Terminal; intended to surface to a human rather than loop.
    #[error("stuck rollback: {0}")]
    StuckRollback(String),

    /// Transport-level failure, propagated unchanged. Retry policy for
    /// these belongs to the external driver.
    #[error("transport: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Map a remote API error into a reconcile error. `Busy` becomes a
    /// fixed-backoff retry, never a hard error.
    pub fn from_remote(err: RemoteError, busy_backoff: Duration) -> Self {
        match err {
            RemoteError::NotFound(id) => Self::NotFound(id),
            RemoteError::Busy(reason) => Self::RetryAfter {
                reason,
                after: busy_backoff,
            },
            RemoteError::InvalidRequest(msg) => Self::InvalidRequest(msg),
            RemoteError::Transport(e) => Self::Transport(e),
        }
    }

    pub fn retry_after(reason: impl Into<String>, after: Duration) -> Self {
        Self::RetryAfter {
            reason: reason.into(),
            after,
        }
    }
}

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
