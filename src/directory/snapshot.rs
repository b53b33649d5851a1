//! Snapshot Cache
//!
//! Publishes the combined membership + leadership view as an immutable
//! `Arc<Snapshot>` behind a `tokio::sync::watch` channel. `current()` is an
//! O(1) reference clone that never takes a lock shared with writers and never
//! blocks on the backend; construction is serialized by an internal mutex so a
//! published snapshot is never half-applied and `version` strictly increases.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::backend::types::now_ms;

use super::types::{LeaderRecord, Member, Snapshot};

pub struct SnapshotCache {
    tx: watch::Sender<Arc<Snapshot>>,
    /// Last published version; doubles as the publication lock.
    version: Mutex<u64>,
    last_publish_ms: AtomicU64,
}

impl SnapshotCache {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(Arc::new(Snapshot::empty()));
        Arc::new(Self {
            tx,
            version: Mutex::new(0),
            last_publish_ms: AtomicU64::new(0),
        })
    }

    /// Latest published snapshot. Non-blocking; in-flight readers keep their
    /// reference even while a newer snapshot is being published.
    pub fn current(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    /// Builds and publishes a new snapshot. Returns the published version.
    pub fn publish(&self, members: Vec<Member>, leader: Option<LeaderRecord>) -> u64 {
        let mut version = self.version.lock().unwrap();
        *version += 1;

        let snapshot = Arc::new(Snapshot {
            members,
            leader,
            version: *version,
        });
        self.tx.send_replace(snapshot);
        self.last_publish_ms.store(now_ms(), Ordering::SeqCst);

        tracing::debug!("Published snapshot version {}", *version);
        *version
    }

    pub fn version(&self) -> u64 {
        *self.version.lock().unwrap()
    }

    /// Milliseconds since the last publication; `None` before the first one.
    /// Health checks use this to spot prolonged disconnection.
    pub fn ms_since_publish(&self) -> Option<u64> {
        let published = self.last_publish_ms.load(Ordering::SeqCst);
        if published == 0 {
            return None;
        }
        Some(now_ms().saturating_sub(published))
    }

    /// Change notification for callers that want to await new publications.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }
}
