//! Query Protocol
//!
//! Endpoints and Data Transfer Objects of the read-only surface. Responses are
//! always well-formed: "no leader" is an absent field, empty membership is an
//! empty list, neither is an error.

use serde::{Deserialize, Serialize};

use crate::directory::types::HostAddress;

// --- API Endpoints ---

/// Public endpoint answering "who is the current leader".
pub const ENDPOINT_LEADER: &str = "/leader";
/// Public endpoint answering "who are the current cluster members".
pub const ENDPOINT_MEMBERS: &str = "/members";
/// Internal endpoint exposing sync state and snapshot staleness for health
/// checks; deliberately not part of the public read contract.
pub const ENDPOINT_HEALTH: &str = "/internal/health";

// --- Data Transfer Objects ---

/// Response for `GET /leader`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderResponse {
    /// Address of the current leader; `None` while no leader is known, which
    /// is a valid, observable cluster state (e.g. mid-failover).
    pub leader_address: Option<HostAddress>,
}

/// One member as reported by `GET /members`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MemberEntry {
    pub address: HostAddress,
    /// Backend lease the registration is attached to.
    pub lease_id: i64,
}

/// Response for `GET /members`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MembersResponse {
    /// Snapshot copy ordered by registration key; callers never observe later
    /// mutations through it.
    pub members: Vec<MemberEntry>,
}

/// Response for `GET /internal/health`.
///
/// The staleness signal of the cache: a high `ms_since_publish` together with
/// a non-watching sync state means the served snapshots are old.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub members_sync: String,
    pub leader_sync: String,
    pub snapshot_version: u64,
    pub ms_since_publish: Option<u64>,
}
