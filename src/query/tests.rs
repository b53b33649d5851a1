//! Query Module Tests
//!
//! Validates the read-only surface against the snapshot cache directly: the
//! handlers must be pure reads, always return 200, and represent "no leader"
//! and "no members" as well-formed empty responses.

#[cfg(test)]
mod tests {
    use axum::extract::Extension;
    use axum::http::StatusCode;

    use crate::backend::{LeaseId, MemoryBackend};
    use crate::directory::{
        DirectorySync, HostAddress, LeaderRecord, Member, SnapshotCache,
    };
    use crate::query::handlers::{handle_health, handle_leader, handle_members};

    fn addr(host: &str) -> HostAddress {
        HostAddress {
            host: host.to_string(),
            port: 9000,
        }
    }

    #[tokio::test]
    async fn test_leader_absent_is_ok_not_error() {
        let cache = SnapshotCache::new();

        let (status, response) = handle_leader(Extension(cache)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.leader_address.is_none());
    }

    #[tokio::test]
    async fn test_empty_membership_is_ok_not_error() {
        let cache = SnapshotCache::new();

        let (status, response) = handle_members(Extension(cache)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.members.is_empty());
    }

    #[tokio::test]
    async fn test_leader_returns_published_record() {
        let cache = SnapshotCache::new();
        cache.publish(
            vec![],
            Some(LeaderRecord {
                address: addr("leader-node"),
                lease_id: LeaseId(7),
                term: 3,
            }),
        );

        let (status, response) = handle_leader(Extension(cache)).await;

        assert_eq!(status, StatusCode::OK);
        let axum::Json(body) = response;
        assert_eq!(body.leader_address.unwrap().host, "leader-node");
    }

    #[tokio::test]
    async fn test_members_returns_snapshot_copy() {
        let cache = SnapshotCache::new();
        cache.publish(
            vec![
                Member {
                    address: addr("node-a"),
                    lease_id: LeaseId(1),
                },
                Member {
                    address: addr("node-b"),
                    lease_id: LeaseId(2),
                },
            ],
            None,
        );

        let (_, response) = handle_members(Extension(cache.clone())).await;
        assert_eq!(response.members.len(), 2);
        assert_eq!(response.members[0].address.host, "node-a");
        assert_eq!(response.members[0].lease_id, 1);

        // A later publication must not affect the already-produced response.
        cache.publish(vec![], None);
        assert_eq!(response.members.len(), 2);
    }

    #[tokio::test]
    async fn test_health_reports_version_and_states() {
        let backend = MemoryBackend::new();
        let cache = SnapshotCache::new();
        let sync = DirectorySync::new(backend, cache.clone());

        cache.publish(vec![], None);

        let (status, response) = handle_health(Extension(sync)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.snapshot_version, 1);
        assert_eq!(response.members_sync, "disconnected");
        assert_eq!(response.leader_sync, "disconnected");
        assert!(response.ms_since_publish.is_some());
    }
}
