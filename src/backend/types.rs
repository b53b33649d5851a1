//! Backend Wire Types
//!
//! The shapes exchanged across the coordination boundary: lease identifiers,
//! revisions, key-value records, and the ordered change events a watch delivers.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::BackendError;

/// Backend-wide logical clock. Every modification gets the next revision, so a
/// watch consumer can resume from the last revision it acknowledged.
pub type Revision = i64;

/// Identifier of a TTL lease granted by the backend.
///
/// The lease is the backend's liveness mechanism: keys attached to it disappear
/// when it expires, which is how dead participants leave the member set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LeaseId(pub i64);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of modification a watch event reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// One ordered modification delivered by a watch.
///
/// `value` is present for `Put` and absent for `Delete`; `lease_id` is the lease
/// the key was attached to at the time of the modification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub key: String,
    pub value: Option<String>,
    pub lease_id: LeaseId,
    pub revision: Revision,
}

/// A key-value record returned by point reads and listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub lease_id: LeaseId,
}

/// Result of a full prefix listing, captured at one revision.
///
/// The revision is the resume point for the watch issued right after a resync:
/// events at or below it are already reflected in `entries`.
#[derive(Debug, Clone)]
pub struct Listing {
    pub entries: Vec<KeyValue>,
    pub revision: Revision,
}

/// A lazy, unbounded sequence of change events for one key or prefix.
///
/// `next()` returning `None` means the backend closed the watch (disconnect);
/// the consumer is expected to re-establish it and resync. An `Err` item is a
/// terminal stream failure such as `StaleWatchStream`.
pub struct WatchStream {
    rx: mpsc::Receiver<Result<ChangeEvent, BackendError>>,
}

impl WatchStream {
    pub fn new(rx: mpsc::Receiver<Result<ChangeEvent, BackendError>>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<Result<ChangeEvent, BackendError>> {
        self.rx.recv().await
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
