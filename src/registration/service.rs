//! Registrar Service
//!
//! Owns a participant's lease lifecycle: acquire, publish the member key,
//! campaign, renew, and recover when the lease lapses server-side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::backend::{BackendError, BackendResult, CoordinationBackend, LeaseId};
use crate::directory::types::{member_key, HostAddress, LEADER_KEY};

const RETRY_INITIAL_MS: u64 = 150;
const RETRY_CAP_MS: u64 = 5_000;

pub struct Registrar {
    backend: Arc<dyn CoordinationBackend>,
    /// Registration key, unique per process lifetime.
    member_key: String,
    /// JSON-encoded advertised address, the value for both the member key and
    /// a successful campaign.
    encoded_address: String,
    address: HostAddress,
    ttl: Duration,
    /// Whether this participant competes for the leader key at all.
    campaign: bool,
    lease: Mutex<Option<LeaseId>>,
    holds_leadership: AtomicBool,
    /// Set by `shutdown`; stops the maintenance loop from re-registering a
    /// participant that has deliberately left.
    stopped: AtomicBool,
}

impl Registrar {
    pub fn new(
        backend: Arc<dyn CoordinationBackend>,
        address: HostAddress,
        ttl: Duration,
        campaign: bool,
    ) -> Arc<Self> {
        let encoded_address =
            serde_json::to_string(&address).expect("HostAddress always encodes as JSON");

        Arc::new(Self {
            backend,
            member_key: member_key(&Uuid::new_v4().to_string()),
            encoded_address,
            address,
            ttl,
            campaign,
            lease: Mutex::new(None),
            holds_leadership: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn member_key(&self) -> &str {
        &self.member_key
    }

    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    /// Whether the most recent campaign attempt left this process holding the
    /// leader key. Authoritative leadership is still what the directory cache
    /// observes through the watch path.
    pub fn holds_leadership(&self) -> bool {
        self.holds_leadership.load(Ordering::SeqCst)
    }

    pub fn current_lease(&self) -> Option<LeaseId> {
        *self.lease.lock().unwrap()
    }

    /// Spawns the registration maintenance loop and returns immediately.
    pub fn start(self: Arc<Self>) {
        tracing::info!(
            "Starting registrar for {} (key {}, ttl {:?}, campaigning: {})",
            self.address,
            self.member_key,
            self.ttl,
            self.campaign
        );

        let registrar = self.clone();
        tokio::spawn(async move {
            registrar.maintain_loop().await;
        });
    }

    /// Deregisters explicitly: deletes the member key and releases the lease
    /// so the rest of the cluster sees the departure immediately instead of
    /// waiting out the TTL.
    pub async fn shutdown(&self) -> BackendResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.holds_leadership.store(false, Ordering::SeqCst);

        let lease = self.lease.lock().unwrap().take();
        if let Some(lease) = lease {
            self.backend.delete(&self.member_key).await?;
            self.backend.release_lease(lease).await?;
            tracing::info!("Deregistered {} and released lease {}", self.member_key, lease);
        }
        Ok(())
    }

    async fn maintain_loop(self: Arc<Self>) {
        let mut retry_delay_ms = RETRY_INITIAL_MS;

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                tracing::info!("Registrar for {} stopped", self.member_key);
                return;
            }

            if self.current_lease().is_none() {
                match self.register().await {
                    Ok(lease) => {
                        tracing::info!("Registered {} under lease {}", self.member_key, lease);
                        retry_delay_ms = RETRY_INITIAL_MS;
                    }
                    Err(e) => {
                        tracing::warn!("Registration failed, will retry: {}", e);
                        let jitter = rand::random::<u64>() % 50;
                        tokio::time::sleep(Duration::from_millis(retry_delay_ms + jitter)).await;
                        retry_delay_ms = (retry_delay_ms * 2).min(RETRY_CAP_MS);
                        continue;
                    }
                }
            }

            tokio::time::sleep(self.renew_interval()).await;

            if self.stopped.load(Ordering::SeqCst) {
                tracing::info!("Registrar for {} stopped", self.member_key);
                return;
            }

            let Some(lease) = self.current_lease() else {
                continue;
            };

            match self.backend.renew_lease(lease).await {
                Ok(()) => {
                    // Failover without an external trigger: one non-blocking
                    // attempt per renewal tick while not holding the key.
                    if self.campaign && !self.holds_leadership() {
                        self.try_campaign(lease).await;
                    }
                }
                Err(BackendError::LeaseNotFound(_)) => {
                    // The backend already considers us gone; our registration
                    // and any leadership vanished with the lease.
                    tracing::warn!(
                        "Lease {} expired server-side, re-registering {}",
                        lease,
                        self.member_key
                    );
                    self.holds_leadership.store(false, Ordering::SeqCst);
                    *self.lease.lock().unwrap() = None;
                }
                Err(e) => {
                    tracing::warn!("Lease renewal failed, retrying next tick: {}", e);
                }
            }
        }
    }

    /// Acquires a fresh lease, publishes the member key, and campaigns once if
    /// configured. A partially failed registration leaves the orphan lease to
    /// expire by TTL.
    async fn register(&self) -> BackendResult<LeaseId> {
        let lease = self.backend.acquire_lease(self.ttl).await?;
        self.backend
            .put(&self.member_key, &self.encoded_address, lease)
            .await?;
        *self.lease.lock().unwrap() = Some(lease);

        if self.campaign {
            self.try_campaign(lease).await;
        }
        Ok(lease)
    }

    async fn try_campaign(&self, lease: LeaseId) {
        match self
            .backend
            .campaign(LEADER_KEY, &self.encoded_address, lease)
            .await
        {
            Ok(true) => {
                tracing::info!("Campaign won, {} now holds the leader key", self.address);
                self.holds_leadership.store(true, Ordering::SeqCst);
            }
            Ok(false) => {
                tracing::debug!("Campaign lost, another lease holds the leader key");
            }
            Err(e) => {
                tracing::warn!("Campaign attempt failed: {}", e);
            }
        }
    }

    fn renew_interval(&self) -> Duration {
        // A third of the TTL gives two retries' headroom before expiry.
        Duration::from_millis((self.ttl.as_millis() as u64 / 3).max(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn test_register_publishes_member_key_and_wins_campaign() {
        let backend = MemoryBackend::new();
        let registrar = Registrar::new(
            backend.clone(),
            HostAddress {
                host: "node-a".to_string(),
                port: 7000,
            },
            Duration::from_secs(5),
            true,
        );

        registrar.register().await.unwrap();

        let member = backend.get(registrar.member_key()).await.unwrap().unwrap();
        let decoded: HostAddress = serde_json::from_str(&member.value).unwrap();
        assert_eq!(decoded.host, "node-a");
        assert_eq!(member.lease_id, registrar.current_lease().unwrap());

        // Sole campaigner wins.
        assert!(registrar.holds_leadership());
        let leader = backend.get(LEADER_KEY).await.unwrap().unwrap();
        assert_eq!(leader.lease_id, registrar.current_lease().unwrap());
    }

    #[tokio::test]
    async fn test_second_campaigner_loses() {
        let backend = MemoryBackend::new();
        let first = Registrar::new(
            backend.clone(),
            HostAddress {
                host: "node-a".to_string(),
                port: 7000,
            },
            Duration::from_secs(5),
            true,
        );
        let second = Registrar::new(
            backend.clone(),
            HostAddress {
                host: "node-b".to_string(),
                port: 7000,
            },
            Duration::from_secs(5),
            true,
        );

        first.register().await.unwrap();
        second.register().await.unwrap();

        assert!(first.holds_leadership());
        assert!(!second.holds_leadership());

        // Both are members regardless of who leads.
        let listing = backend
            .list(crate::directory::types::MEMBERS_PREFIX)
            .await
            .unwrap();
        assert_eq!(listing.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_reregisters_after_lease_expiry() {
        let backend = MemoryBackend::new();
        let registrar = Registrar::new(
            backend.clone(),
            HostAddress {
                host: "node-a".to_string(),
                port: 7000,
            },
            Duration::from_millis(300),
            false,
        );

        registrar.clone().start();

        // Wait for the initial registration.
        let first_lease = wait_for_lease(&registrar, None).await;

        // Kill the lease server-side; the loop must notice on renewal and
        // come back under a fresh lease.
        backend.expire_lease_now(first_lease);
        let second_lease = wait_for_lease(&registrar, Some(first_lease)).await;
        assert_ne!(first_lease, second_lease);

        let member = backend.get(registrar.member_key()).await.unwrap().unwrap();
        assert_eq!(member.lease_id, second_lease);
    }

    #[tokio::test]
    async fn test_shutdown_deregisters() {
        let backend = MemoryBackend::new();
        let registrar = Registrar::new(
            backend.clone(),
            HostAddress {
                host: "node-a".to_string(),
                port: 7000,
            },
            Duration::from_secs(5),
            false,
        );

        registrar.register().await.unwrap();
        assert!(backend.get(registrar.member_key()).await.unwrap().is_some());

        registrar.shutdown().await.unwrap();
        assert!(backend.get(registrar.member_key()).await.unwrap().is_none());
        assert!(registrar.current_lease().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_maintenance_loop() {
        let backend = MemoryBackend::new();
        let registrar = Registrar::new(
            backend.clone(),
            HostAddress {
                host: "node-a".to_string(),
                port: 7000,
            },
            Duration::from_millis(300),
            false,
        );

        registrar.clone().start();
        wait_for_lease(&registrar, None).await;

        registrar.shutdown().await.unwrap();

        // Several renewal intervals later the loop must not have come back
        // with a fresh registration.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(registrar.current_lease().is_none());
        assert!(backend.get(registrar.member_key()).await.unwrap().is_none());
    }

    async fn wait_for_lease(registrar: &Arc<Registrar>, not: Option<LeaseId>) -> LeaseId {
        for _ in 0..200 {
            if let Some(lease) = registrar.current_lease() {
                if Some(lease) != not {
                    return lease;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("registrar did not (re)acquire a lease in time");
    }
}
