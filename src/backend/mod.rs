//! Coordination Backend Boundary
//!
//! Defines the contract this service consumes from its coordination store:
//! TTL leases, a single-attempt campaign primitive, and ordered change watches
//! over keys and prefixes. Leader election correctness is delegated entirely to
//! the backend's lease semantics; nothing in this crate implements consensus.
//!
//! ## Required backend properties
//! - Lease expiry deletes every key attached to the lease and emits DELETE
//!   events for them.
//! - Watch delivery is a total order of modifications per key. The cache applies
//!   events strictly in delivery order and depends on this.
//! - A watch that cannot resume from the requested revision fails with
//!   `StaleWatchStream`, which forces the consumer into a full resync.

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::CoordinationBackend;
pub use error::{BackendError, BackendResult};
pub use memory::MemoryBackend;
pub use types::{ChangeEvent, EventKind, KeyValue, LeaseId, Listing, Revision, WatchStream};
