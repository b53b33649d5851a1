//! In-Process Reference Backend
//!
//! A complete in-memory implementation of the `CoordinationBackend` contract.
//! Used by single-process runs of the binary and by every test that needs a
//! backend it can steer (expire a lease, cut the watch streams, flip the store
//! to unavailable).
//!
//! ## Semantics
//! - **Revisions**: all mutations are serialized behind one write lock, so the
//!   global revision counter doubles as a per-key total order for watchers.
//! - **Leases**: a background sweeper expires overdue leases and deletes their
//!   keys, emitting DELETE events exactly like an explicit deregistration.
//! - **Watches**: fanout over a broadcast channel with a bounded replay window.
//!   A watcher that falls behind the window, or resumes from a compacted
//!   revision, gets `StaleWatchStream` and must resync from a full listing.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use super::client::CoordinationBackend;
use super::error::{BackendError, BackendResult};
use super::types::{
    now_ms, ChangeEvent, EventKind, KeyValue, LeaseId, Listing, Revision, WatchStream,
};

/// How many past events the backend retains for watch resumption.
const HISTORY_RETAIN: usize = 1024;
/// Broadcast fanout capacity; a watcher lagging past this is declared stale.
const FANOUT_CAPACITY: usize = 256;
/// How often the sweeper checks for expired leases.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    lease_id: LeaseId,
}

#[derive(Debug, Clone)]
struct LeaseMeta {
    ttl_ms: u64,
    expires_at_ms: u64,
}

/// Mutation-side state. Held under one lock so revision assignment, the data
/// write, and event emission happen as a unit, preserving delivery order.
struct WriteState {
    revision: Revision,
    history: VecDeque<ChangeEvent>,
    /// Highest revision already evicted from `history`.
    evicted_before: Revision,
}

pub struct MemoryBackend {
    data: DashMap<String, StoredValue>,
    leases: DashMap<i64, LeaseMeta>,
    write: Mutex<WriteState>,
    events: broadcast::Sender<ChangeEvent>,
    watch_close: broadcast::Sender<()>,
    next_lease: AtomicI64,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(FANOUT_CAPACITY);
        let (watch_close, _) = broadcast::channel(4);

        Arc::new(Self {
            data: DashMap::new(),
            leases: DashMap::new(),
            write: Mutex::new(WriteState {
                revision: 0,
                history: VecDeque::new(),
                evicted_before: 0,
            }),
            events,
            watch_close,
            next_lease: AtomicI64::new(1),
            unavailable: AtomicBool::new(false),
        })
    }

    /// Spawns the lease-expiry sweeper and returns immediately.
    pub fn start_sweeper(self: &Arc<Self>) {
        let backend = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                backend.sweep_expired_leases();
            }
        });
    }

    // --- Test/operations steering ---

    /// Makes every subsequent request fail with `Unavailable` (or restores
    /// service). Watches already established keep flowing; use `drop_watches`
    /// to cut those too.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Closes every open watch stream, simulating a backend-side disconnect.
    pub fn drop_watches(&self) {
        let _ = self.watch_close.send(());
    }

    /// Forces a lease to expire right now, deleting its keys.
    pub fn expire_lease_now(&self, lease: LeaseId) {
        self.leases.remove(&lease.0);
        self.delete_keys_of_lease(lease);
    }

    // --- Internals ---

    fn check_available(&self) -> BackendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend marked down".into()));
        }
        Ok(())
    }

    fn lease_live(&self, lease: LeaseId) -> bool {
        self.leases
            .get(&lease.0)
            .map(|meta| meta.expires_at_ms > now_ms())
            .unwrap_or(false)
    }

    /// Assigns the next revision and fans the event out. Caller holds `write`.
    fn emit_locked(&self, state: &mut WriteState, kind: EventKind, key: String, value: Option<String>, lease_id: LeaseId) {
        state.revision += 1;
        let event = ChangeEvent {
            kind,
            key,
            value,
            lease_id,
            revision: state.revision,
        };

        state.history.push_back(event.clone());
        while state.history.len() > HISTORY_RETAIN {
            if let Some(evicted) = state.history.pop_front() {
                state.evicted_before = evicted.revision;
            }
        }

        // No receivers is fine; watchers come and go.
        let _ = self.events.send(event);
    }

    fn sweep_expired_leases(&self) {
        let now = now_ms();
        let expired: Vec<i64> = self
            .leases
            .iter()
            .filter(|entry| entry.value().expires_at_ms <= now)
            .map(|entry| *entry.key())
            .collect();

        for lease in expired {
            tracing::debug!("Lease {} expired, deleting its keys", lease);
            self.leases.remove(&lease);
            self.delete_keys_of_lease(LeaseId(lease));
        }
    }

    fn delete_keys_of_lease(&self, lease: LeaseId) {
        let keys: Vec<String> = self
            .data
            .iter()
            .filter(|entry| entry.value().lease_id == lease)
            .map(|entry| entry.key().clone())
            .collect();

        let mut state = self.write.lock().unwrap();
        for key in keys {
            // Re-check under the write lock: the key may have been
            // re-registered under a different lease since the scan.
            let still_held = self
                .data
                .get(&key)
                .map(|entry| entry.lease_id == lease)
                .unwrap_or(false);
            if !still_held {
                continue;
            }
            if let Some((key, _)) = self.data.remove(&key) {
                self.emit_locked(&mut state, EventKind::Delete, key, None, lease);
            }
        }
    }

    fn key_matches(target: &str, key: &str) -> bool {
        key == target || (target.ends_with('/') && key.starts_with(target))
    }
}

#[async_trait]
impl CoordinationBackend for MemoryBackend {
    async fn acquire_lease(&self, ttl: Duration) -> BackendResult<LeaseId> {
        self.check_available()?;

        let id = self.next_lease.fetch_add(1, Ordering::SeqCst);
        let ttl_ms = ttl.as_millis() as u64;
        self.leases.insert(
            id,
            LeaseMeta {
                ttl_ms,
                expires_at_ms: now_ms() + ttl_ms,
            },
        );

        tracing::debug!("Granted lease {} (ttl {}ms)", id, ttl_ms);
        Ok(LeaseId(id))
    }

    async fn renew_lease(&self, lease: LeaseId) -> BackendResult<()> {
        self.check_available()?;

        let expired = match self.leases.get_mut(&lease.0) {
            Some(mut meta) => {
                if meta.expires_at_ms <= now_ms() {
                    true
                } else {
                    meta.expires_at_ms = now_ms() + meta.ttl_ms;
                    false
                }
            }
            None => return Err(BackendError::LeaseNotFound(lease)),
        };

        if expired {
            // Expired but not yet swept; finish the job before reporting.
            self.expire_lease_now(lease);
            return Err(BackendError::LeaseNotFound(lease));
        }

        Ok(())
    }

    async fn release_lease(&self, lease: LeaseId) -> BackendResult<()> {
        self.check_available()?;

        if self.leases.remove(&lease.0).is_none() {
            return Err(BackendError::LeaseNotFound(lease));
        }
        self.delete_keys_of_lease(lease);
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, lease: LeaseId) -> BackendResult<()> {
        self.check_available()?;

        if !self.lease_live(lease) {
            return Err(BackendError::LeaseNotFound(lease));
        }

        let mut state = self.write.lock().unwrap();
        self.data.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                lease_id: lease,
            },
        );
        self.emit_locked(
            &mut state,
            EventKind::Put,
            key.to_string(),
            Some(value.to_string()),
            lease,
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.check_available()?;

        let mut state = self.write.lock().unwrap();
        if let Some((key, old)) = self.data.remove(key) {
            self.emit_locked(&mut state, EventKind::Delete, key, None, old.lease_id);
        }
        Ok(())
    }

    async fn campaign(&self, key: &str, value: &str, lease: LeaseId) -> BackendResult<bool> {
        self.check_available()?;

        if !self.lease_live(lease) {
            return Err(BackendError::LeaseNotFound(lease));
        }

        let mut state = self.write.lock().unwrap();

        if let Some(existing) = self.data.get(key) {
            let holder = existing.lease_id;
            drop(existing);
            if self.lease_live(holder) {
                // Another live lease holds the key; single attempt, no blocking.
                return Ok(false);
            }
            // Holder's lease lapsed but the sweeper hasn't caught up.
            if let Some((key, old)) = self.data.remove(key) {
                self.emit_locked(&mut state, EventKind::Delete, key, None, old.lease_id);
            }
        }

        self.data.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                lease_id: lease,
            },
        );
        self.emit_locked(
            &mut state,
            EventKind::Put,
            key.to_string(),
            Some(value.to_string()),
            lease,
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> BackendResult<Option<KeyValue>> {
        self.check_available()?;

        Ok(self.data.get(key).map(|entry| KeyValue {
            key: key.to_string(),
            value: entry.value().value.clone(),
            lease_id: entry.value().lease_id,
        }))
    }

    async fn list(&self, prefix: &str) -> BackendResult<Listing> {
        self.check_available()?;

        // Hold the write lock so the listing and its revision are consistent.
        let state = self.write.lock().unwrap();
        let mut entries: Vec<KeyValue> = self
            .data
            .iter()
            .filter(|entry| Self::key_matches(prefix, entry.key()))
            .map(|entry| KeyValue {
                key: entry.key().clone(),
                value: entry.value().value.clone(),
                lease_id: entry.value().lease_id,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(Listing {
            entries,
            revision: state.revision,
        })
    }

    async fn watch(
        &self,
        key_or_prefix: &str,
        from_revision: Option<Revision>,
    ) -> BackendResult<WatchStream> {
        self.check_available()?;

        let target = key_or_prefix.to_string();
        // Subscribe before snapshotting history so nothing falls in the gap;
        // the forwarder dedupes the overlap by revision.
        let mut fanout = self.events.subscribe();
        let mut close = self.watch_close.subscribe();

        let (replay, mut last_sent) = {
            let state = self.write.lock().unwrap();

            if let Some(from) = from_revision {
                if from < state.evicted_before {
                    return Err(BackendError::StaleWatchStream {
                        requested: from,
                        oldest: state.evicted_before + 1,
                    });
                }
            }

            let floor = from_revision.unwrap_or(state.revision);
            let replay: Vec<ChangeEvent> = state
                .history
                .iter()
                .filter(|event| event.revision > floor && Self::key_matches(&target, &event.key))
                .cloned()
                .collect();
            (replay, floor.max(state.evicted_before))
        };

        let (tx, rx) = mpsc::channel(FANOUT_CAPACITY);

        tokio::spawn(async move {
            for event in replay {
                last_sent = event.revision;
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }

            loop {
                tokio::select! {
                    // Close wins over pending events: once `drop_watches` has
                    // fired, nothing further may leak through this stream.
                    biased;
                    _ = close.recv() => {
                        tracing::debug!("Watch on {} closed by backend", target);
                        return;
                    }
                    received = fanout.recv() => match received {
                        Ok(event) => {
                            if event.revision <= last_sent
                                || !MemoryBackend::key_matches(&target, &event.key)
                            {
                                continue;
                            }
                            last_sent = event.revision;
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(
                                "Watcher on {} lagged by {} events, declaring stale",
                                target,
                                missed
                            );
                            let _ = tx
                                .send(Err(BackendError::StaleWatchStream {
                                    requested: last_sent + 1,
                                    oldest: last_sent + missed as i64 + 1,
                                }))
                                .await;
                            return;
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });

        Ok(WatchStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lease_acquire_and_renew() {
        let backend = MemoryBackend::new();

        let lease = backend
            .acquire_lease(Duration::from_secs(5))
            .await
            .unwrap();
        backend.renew_lease(lease).await.unwrap();

        // Unknown lease
        let missing = backend.renew_lease(LeaseId(9999)).await;
        assert!(matches!(missing, Err(BackendError::LeaseNotFound(_))));
    }

    #[tokio::test]
    async fn test_expired_lease_deletes_keys() {
        let backend = MemoryBackend::new();

        let lease = backend
            .acquire_lease(Duration::from_secs(5))
            .await
            .unwrap();
        backend.put("/k/a", "1", lease).await.unwrap();

        let mut watch = backend.watch("/k/", None).await.unwrap();

        backend.expire_lease_now(lease);

        let event = watch.next().await.unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Delete);
        assert_eq!(event.key, "/k/a");
        assert_eq!(event.lease_id, lease);

        assert!(backend.get("/k/a").await.unwrap().is_none());
        assert!(matches!(
            backend.renew_lease(lease).await,
            Err(BackendError::LeaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_campaign_is_exclusive() {
        let backend = MemoryBackend::new();

        let lease_a = backend
            .acquire_lease(Duration::from_secs(5))
            .await
            .unwrap();
        let lease_b = backend
            .acquire_lease(Duration::from_secs(5))
            .await
            .unwrap();

        assert!(backend.campaign("/leader", "a", lease_a).await.unwrap());
        // Second campaigner loses without blocking.
        assert!(!backend.campaign("/leader", "b", lease_b).await.unwrap());

        // Once the holder's lease dies the key opens up again.
        backend.expire_lease_now(lease_a);
        assert!(backend.campaign("/leader", "b", lease_b).await.unwrap());

        let kv = backend.get("/leader").await.unwrap().unwrap();
        assert_eq!(kv.value, "b");
        assert_eq!(kv.lease_id, lease_b);
    }

    #[tokio::test]
    async fn test_watch_delivers_in_revision_order() {
        let backend = MemoryBackend::new();
        let lease = backend
            .acquire_lease(Duration::from_secs(5))
            .await
            .unwrap();

        let mut watch = backend.watch("/m/", None).await.unwrap();

        backend.put("/m/a", "1", lease).await.unwrap();
        backend.put("/m/b", "2", lease).await.unwrap();
        backend.delete("/m/a").await.unwrap();

        let first = watch.next().await.unwrap().unwrap();
        let second = watch.next().await.unwrap().unwrap();
        let third = watch.next().await.unwrap().unwrap();

        assert_eq!(first.key, "/m/a");
        assert_eq!(first.kind, EventKind::Put);
        assert_eq!(second.key, "/m/b");
        assert_eq!(third.key, "/m/a");
        assert_eq!(third.kind, EventKind::Delete);
        assert!(first.revision < second.revision && second.revision < third.revision);
    }

    #[tokio::test]
    async fn test_watch_replays_from_revision() {
        let backend = MemoryBackend::new();
        let lease = backend
            .acquire_lease(Duration::from_secs(5))
            .await
            .unwrap();

        backend.put("/m/a", "1", lease).await.unwrap();
        let listing = backend.list("/m/").await.unwrap();
        backend.put("/m/b", "2", lease).await.unwrap();

        // Resume from the listing revision: only /m/b should be replayed.
        let mut watch = backend.watch("/m/", Some(listing.revision)).await.unwrap();
        let replayed = watch.next().await.unwrap().unwrap();
        assert_eq!(replayed.key, "/m/b");
    }

    #[tokio::test]
    async fn test_watch_from_compacted_revision_is_stale() {
        let backend = MemoryBackend::new();
        let lease = backend
            .acquire_lease(Duration::from_secs(30))
            .await
            .unwrap();

        // Push enough events to evict revision 1 from the history window.
        for i in 0..(HISTORY_RETAIN + 10) {
            backend
                .put("/m/key", &format!("v{}", i), lease)
                .await
                .unwrap();
        }

        let result = backend.watch("/m/", Some(1)).await;
        assert!(matches!(
            result,
            Err(BackendError::StaleWatchStream { .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_backend_rejects_requests() {
        let backend = MemoryBackend::new();
        backend.set_unavailable(true);

        let result = backend.acquire_lease(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
        assert!(result.unwrap_err().is_retryable());

        backend.set_unavailable(false);
        assert!(backend.acquire_lease(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_watches_closes_streams() {
        let backend = MemoryBackend::new();
        let mut watch = backend.watch("/m/", None).await.unwrap();

        backend.drop_watches();

        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_release_lease_deregisters() {
        let backend = MemoryBackend::new();
        let lease = backend
            .acquire_lease(Duration::from_secs(5))
            .await
            .unwrap();
        backend.put("/m/a", "1", lease).await.unwrap();

        backend.release_lease(lease).await.unwrap();

        assert!(backend.get("/m/a").await.unwrap().is_none());
        let listing = backend.list("/m/").await.unwrap();
        assert!(listing.entries.is_empty());
    }

    #[tokio::test]
    async fn test_expiring_old_lease_spares_rebound_key() {
        let backend = MemoryBackend::new();
        let lease_a = backend
            .acquire_lease(Duration::from_secs(5))
            .await
            .unwrap();
        let lease_b = backend
            .acquire_lease(Duration::from_secs(5))
            .await
            .unwrap();

        backend.put("/m/a", "1", lease_a).await.unwrap();
        // Rejoin: the same key is re-registered under a fresh lease.
        backend.put("/m/a", "2", lease_b).await.unwrap();

        let mut watch = backend.watch("/m/", None).await.unwrap();
        backend.expire_lease_now(lease_a);

        // The key belongs to lease_b now and must survive lease_a's death.
        let kv = backend.get("/m/a").await.unwrap().unwrap();
        assert_eq!(kv.value, "2");
        assert_eq!(kv.lease_id, lease_b);

        // No DELETE was emitted for it either: the next event the watcher
        // sees is a fresh PUT, not a retraction of /m/a.
        backend.put("/m/b", "3", lease_b).await.unwrap();
        let event = watch.next().await.unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Put);
        assert_eq!(event.key, "/m/b");
    }
}
