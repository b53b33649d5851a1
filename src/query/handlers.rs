use axum::{extract::Extension, http::StatusCode, Json};
use std::sync::Arc;

use crate::directory::{DirectorySync, SnapshotCache};

use super::protocol::{HealthResponse, LeaderResponse, MemberEntry, MembersResponse};

/// `GET /leader`. Reads the published snapshot only; cannot fail internally.
pub async fn handle_leader(
    Extension(cache): Extension<Arc<SnapshotCache>>,
) -> (StatusCode, Json<LeaderResponse>) {
    let snapshot = cache.current();

    (
        StatusCode::OK,
        Json(LeaderResponse {
            leader_address: snapshot.leader.as_ref().map(|record| record.address.clone()),
        }),
    )
}

/// `GET /members`. Returns a snapshot copy; later cache updates are invisible
/// to the response.
pub async fn handle_members(
    Extension(cache): Extension<Arc<SnapshotCache>>,
) -> (StatusCode, Json<MembersResponse>) {
    let snapshot = cache.current();

    let members = snapshot
        .members
        .iter()
        .map(|member| MemberEntry {
            address: member.address.clone(),
            lease_id: member.lease_id.0,
        })
        .collect();

    (StatusCode::OK, Json(MembersResponse { members }))
}

/// `GET /internal/health`. Surfaces the per-loop sync state and snapshot
/// staleness so operators can spot prolonged disconnection; the public read
/// endpoints deliberately carry none of this.
pub async fn handle_health(
    Extension(sync): Extension<Arc<DirectorySync>>,
) -> (StatusCode, Json<HealthResponse>) {
    let status = sync.status();

    (
        StatusCode::OK,
        Json(HealthResponse {
            members_sync: status.members.as_str().to_string(),
            leader_sync: status.leader.as_str().to_string(),
            snapshot_version: status.snapshot_version,
            ms_since_publish: status.ms_since_publish,
        }),
    )
}
