//! Coordination Backend Contract
//!
//! The object-safe trait every coordination store adapter implements. The
//! directory sync loops and the registrar only ever hold an
//! `Arc<dyn CoordinationBackend>`, so swapping the in-process reference backend
//! for a networked one is a wiring change in `main.rs`, nothing else.

use async_trait::async_trait;
use std::time::Duration;

use super::error::BackendResult;
use super::types::{KeyValue, LeaseId, Listing, Revision, WatchStream};

#[async_trait]
pub trait CoordinationBackend: Send + Sync {
    /// Grants a new lease that expires after `ttl` unless renewed.
    async fn acquire_lease(&self, ttl: Duration) -> BackendResult<LeaseId>;

    /// Extends the lease for another full TTL.
    ///
    /// Fails with `LeaseNotFound` once the lease has expired server-side; the
    /// holder must then reacquire and re-register rather than keep renewing.
    async fn renew_lease(&self, lease: LeaseId) -> BackendResult<()>;

    /// Releases the lease early, deleting every key attached to it.
    async fn release_lease(&self, lease: LeaseId) -> BackendResult<()>;

    /// Writes `key = value` attached to `lease`. The key disappears when the
    /// lease does.
    async fn put(&self, key: &str, value: &str, lease: LeaseId) -> BackendResult<()>;

    /// Deletes a key explicitly (deregistration).
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Single non-blocking attempt to become the holder of `key`.
    ///
    /// Returns `false` rather than blocking if another live lease already holds
    /// the key. On `true`, `key = value` has been written under `lease`.
    async fn campaign(&self, key: &str, value: &str, lease: LeaseId) -> BackendResult<bool>;

    /// Point read of one key.
    async fn get(&self, key: &str) -> BackendResult<Option<KeyValue>>;

    /// Full listing of a prefix together with the revision it was captured at.
    async fn list(&self, prefix: &str) -> BackendResult<Listing>;

    /// Opens an ordered change stream for `key_or_prefix`.
    ///
    /// With `from_revision` set, delivery starts strictly after that revision;
    /// if the backend no longer retains that point it fails with
    /// `StaleWatchStream` and the caller must resync from a fresh listing.
    async fn watch(
        &self,
        key_or_prefix: &str,
        from_revision: Option<Revision>,
    ) -> BackendResult<WatchStream>;
}
