//! Backend Error Taxonomy
//!
//! Every failure the coordination boundary can produce, split by how the caller
//! recovers. The watch-maintenance loops match on these variants: `Unavailable`
//! and `Timeout` are retried with backoff, `LeaseNotFound` makes a participant
//! reacquire and re-register, `StaleWatchStream` forces a full resync instead of
//! an incremental catch-up, and `MalformedEvent` is logged and dropped without
//! poisoning the rest of the snapshot.

use super::types::LeaseId;
use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The coordination store is unreachable. Retried with backoff, never
    /// surfaced to query callers.
    #[error("coordination backend unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within the request deadline.
    #[error("coordination backend request timed out")]
    Timeout,

    /// The referenced lease expired server-side or never existed.
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),

    /// The backend can no longer resume a watch from the requested revision.
    #[error("watch cannot resume from revision {requested}, oldest retained is {oldest}")]
    StaleWatchStream { requested: i64, oldest: i64 },

    /// A watch event failed basic shape validation.
    #[error("malformed watch event for key {key}: {reason}")]
    MalformedEvent { key: String, reason: String },
}

impl BackendError {
    /// True for failures that a retry loop should absorb with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Timeout)
    }
}
