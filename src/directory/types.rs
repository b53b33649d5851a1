//! Directory Data Model
//!
//! The records the cache folds watch events into, the immutable `Snapshot` it
//! publishes, and the keyspace the directory occupies on the backend.

use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, LeaseId};

// --- Backend keyspace ---

/// Prefix under which every participant registers its address.
pub const MEMBERS_PREFIX: &str = "/cluster/members/";
/// The single key whose holder is the cluster leader.
pub const LEADER_KEY: &str = "/cluster/leader";

/// Registration key for a participant id.
pub fn member_key(id: &str) -> String {
    format!("{}{}", MEMBERS_PREFIX, id)
}

// --- Records ---

/// Network identity of a participant. Opaque to the directory; `host` may be a
/// DNS name, the cache never resolves it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for HostAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One cluster participant currently holding a live lease.
///
/// A registration key re-appearing under a different lease is a rejoin and
/// replaces the entry wholesale, not an in-place update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub address: HostAddress,
    pub lease_id: LeaseId,
}

/// The current holder of the leader key.
///
/// `term` strictly increases on every applied leadership change (including a
/// transition to "no leader") and is used to detect stale observations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderRecord {
    pub address: HostAddress,
    pub lease_id: LeaseId,
    pub term: u64,
}

/// Immutable combined view of membership and leadership at one point in
/// logical time. `version` strictly increases per publication and never resets
/// while the process runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Members ordered by registration key, so responses are deterministic.
    pub members: Vec<Member>,
    /// `None` is the valid "no leader" state, never a stale record.
    pub leader: Option<LeaderRecord>,
    pub version: u64,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            members: Vec::new(),
            leader: None,
            version: 0,
        }
    }
}

/// Per-watch-loop synchronization state.
///
/// `Disconnected -> Resyncing -> Watching`, back to `Disconnected` on any
/// stream error. There is no terminal state while the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Resyncing,
    Watching,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Disconnected => "disconnected",
            SyncState::Resyncing => "resyncing",
            SyncState::Watching => "watching",
        }
    }
}

/// Decodes a backend value into a `HostAddress`, classifying failures as
/// `MalformedEvent` so the caller can log and exclude the key.
pub fn decode_host_address(key: &str, value: Option<&str>) -> Result<HostAddress, BackendError> {
    let raw = value.ok_or_else(|| BackendError::MalformedEvent {
        key: key.to_string(),
        reason: "PUT carried no value".to_string(),
    })?;

    serde_json::from_str(raw).map_err(|e| BackendError::MalformedEvent {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
