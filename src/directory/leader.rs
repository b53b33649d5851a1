//! Leader Resolver
//!
//! Folds the ordered watch stream of the single leader key into the current
//! `LeaderRecord`. The backend's lease semantics decide *who* wins the key;
//! this resolver only tracks the observed outcome and stamps each change with
//! a strictly increasing `term`.
//!
//! ## Transition rules
//! - PUT with a new lease id: increment `term`, replace the record.
//! - PUT with the held lease id (renewal echo): no-op.
//! - DELETE: clear to absent, increment `term`.
//! - Reconcile after a stream restart: a point read that disagrees with the
//!   held lease id goes through the same transitions.

use crate::backend::{ChangeEvent, EventKind, KeyValue, LeaseId};

use super::types::{decode_host_address, HostAddress, LeaderRecord};

pub struct LeaderResolver {
    record: Option<LeaderRecord>,
    /// Lives outside the record so it keeps increasing across absent periods
    /// and resyncs; it never decreases while the process runs.
    term: u64,
}

impl LeaderResolver {
    pub fn new() -> Self {
        Self {
            record: None,
            term: 0,
        }
    }

    /// Applies one watch event in delivery order. Returns whether the
    /// leadership view changed.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        match event.kind {
            EventKind::Put => {
                let address = match decode_host_address(&event.key, event.value.as_deref()) {
                    Ok(address) => address,
                    Err(e) => {
                        tracing::warn!("Dropping malformed leader event: {}", e);
                        // A leader record we cannot decode must not be served.
                        return self.clear();
                    }
                };
                self.observe(address, event.lease_id)
            }
            EventKind::Delete => self.clear(),
        }
    }

    /// Reconciles against a point read performed after a stream restart.
    /// Returns whether the leadership view changed.
    pub fn reconcile(&mut self, read: Option<&KeyValue>) -> bool {
        match read {
            Some(kv) => match decode_host_address(&kv.key, Some(&kv.value)) {
                Ok(address) => self.observe(address, kv.lease_id),
                Err(e) => {
                    tracing::warn!("Excluding malformed leader record on resync: {}", e);
                    self.clear()
                }
            },
            None => self.clear(),
        }
    }

    pub fn current(&self) -> Option<&LeaderRecord> {
        self.record.as_ref()
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    fn observe(&mut self, address: HostAddress, lease_id: LeaseId) -> bool {
        if let Some(current) = &self.record {
            if current.lease_id == lease_id {
                // Renewal echo of the holder we already track.
                return false;
            }
        }

        self.term += 1;
        tracing::info!(
            "Leader changed to {} (lease {}, term {})",
            address,
            lease_id,
            self.term
        );
        self.record = Some(LeaderRecord {
            address,
            lease_id,
            term: self.term,
        });
        true
    }

    fn clear(&mut self) -> bool {
        if self.record.is_none() {
            return false;
        }
        self.term += 1;
        tracing::info!("Leader absent (term {})", self.term);
        self.record = None;
        true
    }
}

impl Default for LeaderResolver {
    fn default() -> Self {
        Self::new()
    }
}
