//! Watch Maintenance
//!
//! Runs one background task per watched namespace (members prefix, leader
//! key). Each task cycles through the `Disconnected -> Resyncing -> Watching`
//! state machine: full resync first, then strictly in-order incremental
//! application, and bounded exponential backoff whenever the backend drops the
//! stream. There is no overall reconnect timeout: the cache keeps serving its
//! last published snapshot while reconnecting, and `status()` exposes enough
//! for an operator to notice prolonged disconnection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{BackendError, CoordinationBackend, Revision};

use super::leader::LeaderResolver;
use super::membership::MembershipTracker;
use super::snapshot::SnapshotCache;
use super::types::{SyncState, LEADER_KEY, MEMBERS_PREFIX};

const BACKOFF_INITIAL_MS: u64 = 150;
const BACKOFF_CAP_MS: u64 = 5_000;

/// Reconnect backoff with jitter to prevent thundering herd.
struct Backoff {
    delay_ms: u64,
}

impl Backoff {
    fn new() -> Self {
        Self {
            delay_ms: BACKOFF_INITIAL_MS,
        }
    }

    fn reset(&mut self) {
        self.delay_ms = BACKOFF_INITIAL_MS;
    }

    async fn sleep(&mut self) {
        let jitter = rand::random::<u64>() % 50;
        tokio::time::sleep(Duration::from_millis(self.delay_ms + jitter)).await;
        self.delay_ms = (self.delay_ms * 2).min(BACKOFF_CAP_MS);
    }
}

/// Operator-facing view of the watch loops and the snapshot they feed.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub members: SyncState,
    pub leader: SyncState,
    pub snapshot_version: u64,
    pub ms_since_publish: Option<u64>,
}

/// Owns the two trackers and the background tasks keeping them synchronized.
pub struct DirectorySync {
    backend: Arc<dyn CoordinationBackend>,
    membership: Mutex<MembershipTracker>,
    leader: Mutex<LeaderResolver>,
    cache: Arc<SnapshotCache>,
    members_state: Mutex<SyncState>,
    leader_state: Mutex<SyncState>,
}

impl DirectorySync {
    pub fn new(backend: Arc<dyn CoordinationBackend>, cache: Arc<SnapshotCache>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            membership: Mutex::new(MembershipTracker::new()),
            leader: Mutex::new(LeaderResolver::new()),
            cache,
            members_state: Mutex::new(SyncState::Disconnected),
            leader_state: Mutex::new(SyncState::Disconnected),
        })
    }

    /// Spawns both watch loops and returns immediately.
    pub fn start(self: Arc<Self>) {
        tracing::info!("Starting directory sync");

        let members = self.clone();
        tokio::spawn(async move {
            members.members_loop().await;
        });

        let leader = self.clone();
        tokio::spawn(async move {
            leader.leader_loop().await;
        });
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            members: *self.members_state.lock().unwrap(),
            leader: *self.leader_state.lock().unwrap(),
            snapshot_version: self.cache.version(),
            ms_since_publish: self.cache.ms_since_publish(),
        }
    }

    // --- Members namespace ---

    async fn members_loop(self: Arc<Self>) {
        let mut backoff = Backoff::new();

        loop {
            self.set_members_state(SyncState::Resyncing);

            let revision = match self.resync_members().await {
                Ok(revision) => revision,
                Err(e) => {
                    tracing::warn!("Member resync failed: {}", e);
                    self.set_members_state(SyncState::Disconnected);
                    backoff.sleep().await;
                    continue;
                }
            };

            let mut stream = match self.backend.watch(MEMBERS_PREFIX, Some(revision)).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Member watch failed to open: {}", e);
                    self.set_members_state(SyncState::Disconnected);
                    backoff.sleep().await;
                    continue;
                }
            };

            self.set_members_state(SyncState::Watching);
            backoff.reset();

            // Strictly in order; a single consumer per namespace by design.
            while let Some(delivery) = stream.next().await {
                match delivery {
                    Ok(event) => {
                        let changed = self.membership.lock().unwrap().apply(&event);
                        if changed {
                            self.rebuild_and_publish();
                        }
                    }
                    Err(BackendError::StaleWatchStream { requested, oldest }) => {
                        tracing::info!(
                            "Member watch stale (wanted {}, oldest {}), forcing resync",
                            requested,
                            oldest
                        );
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Member watch error: {}", e);
                        break;
                    }
                }
            }

            tracing::info!("Member watch interrupted, reconnecting");
            self.set_members_state(SyncState::Disconnected);
            backoff.sleep().await;
        }
    }

    /// Replaces the member set from a full listing and returns the revision to
    /// resume watching from.
    async fn resync_members(&self) -> Result<Revision, BackendError> {
        let listing = self.backend.list(MEMBERS_PREFIX).await?;
        tracing::debug!(
            "Member resync: {} entries at revision {}",
            listing.entries.len(),
            listing.revision
        );

        let changed = self.membership.lock().unwrap().resync(&listing.entries);
        if changed {
            self.rebuild_and_publish();
        }
        Ok(listing.revision)
    }

    // --- Leader key ---

    async fn leader_loop(self: Arc<Self>) {
        let mut backoff = Backoff::new();

        loop {
            self.set_leader_state(SyncState::Resyncing);

            let revision = match self.resync_leader().await {
                Ok(revision) => revision,
                Err(e) => {
                    tracing::warn!("Leader resync failed: {}", e);
                    self.set_leader_state(SyncState::Disconnected);
                    backoff.sleep().await;
                    continue;
                }
            };

            let mut stream = match self.backend.watch(LEADER_KEY, Some(revision)).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Leader watch failed to open: {}", e);
                    self.set_leader_state(SyncState::Disconnected);
                    backoff.sleep().await;
                    continue;
                }
            };

            self.set_leader_state(SyncState::Watching);
            backoff.reset();

            while let Some(delivery) = stream.next().await {
                match delivery {
                    Ok(event) => {
                        let changed = self.leader.lock().unwrap().apply(&event);
                        if changed {
                            self.rebuild_and_publish();
                        }
                    }
                    Err(BackendError::StaleWatchStream { requested, oldest }) => {
                        tracing::info!(
                            "Leader watch stale (wanted {}, oldest {}), forcing resync",
                            requested,
                            oldest
                        );
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Leader watch error: {}", e);
                        break;
                    }
                }
            }

            tracing::info!("Leader watch interrupted, reconnecting");
            self.set_leader_state(SyncState::Disconnected);
            backoff.sleep().await;
        }
    }

    /// Point-reads the leader key, reconciles the resolver against it, and
    /// returns the revision to resume watching from.
    async fn resync_leader(&self) -> Result<Revision, BackendError> {
        // Listing the exact key gives the read and its revision atomically.
        let listing = self.backend.list(LEADER_KEY).await?;
        let read = listing.entries.first();

        let changed = self.leader.lock().unwrap().reconcile(read);
        if changed {
            self.rebuild_and_publish();
        }
        Ok(listing.revision)
    }

    // --- Publication ---

    /// Builds a snapshot from both trackers and publishes it. Both tracker
    /// locks stay held through the publication so a concurrent rebuild cannot
    /// slip in between the reads and the publish and re-expose state an
    /// earlier version already retracted. Lock order is membership before
    /// leader, the same everywhere.
    fn rebuild_and_publish(&self) {
        let membership = self.membership.lock().unwrap();
        let leader = self.leader.lock().unwrap();
        self.cache
            .publish(membership.members(), leader.current().cloned());
    }

    fn set_members_state(&self, state: SyncState) {
        *self.members_state.lock().unwrap() = state;
    }

    fn set_leader_state(&self, state: SyncState) {
        *self.leader_state.lock().unwrap() = state;
    }
}

#[cfg(test)]
impl DirectorySync {
    /// Applies one members-namespace event the way the watch loop does.
    pub(super) fn apply_member_event(&self, event: &crate::backend::ChangeEvent) {
        let changed = self.membership.lock().unwrap().apply(event);
        if changed {
            self.rebuild_and_publish();
        }
    }

    /// Applies one leader-key event the way the watch loop does.
    pub(super) fn apply_leader_event(&self, event: &crate::backend::ChangeEvent) {
        let changed = self.leader.lock().unwrap().apply(event);
        if changed {
            self.rebuild_and_publish();
        }
    }
}
