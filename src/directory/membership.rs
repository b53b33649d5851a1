//! Membership Tracker
//!
//! Folds the ordered watch stream of the members namespace into the
//! authoritative in-memory member set. PUT inserts or replaces the entry for a
//! registration key, DELETE removes it; no history is kept. After a stream
//! restart `resync` replaces the entire set from a full listing, which is what
//! guards against deletions missed during the disconnect window.
//!
//! The tracker is a passive state machine: the single watch-consuming loop is
//! the only mutator, and every mutation reports whether the set actually
//! changed so unchanged applications (renewal echoes) do not trigger a
//! snapshot publication.

use std::collections::BTreeMap;

use crate::backend::{ChangeEvent, EventKind, KeyValue};

use super::types::{decode_host_address, Member};

pub struct MembershipTracker {
    /// Registration key -> member. BTreeMap keeps snapshot ordering stable.
    entries: BTreeMap<String, Member>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Applies one watch event in delivery order. Returns whether the member
    /// set changed.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        match event.kind {
            EventKind::Put => {
                let address = match decode_host_address(&event.key, event.value.as_deref()) {
                    Ok(address) => address,
                    Err(e) => {
                        // Malformed registration: drop the event and exclude
                        // the key from the next snapshot rather than serving a
                        // record we cannot trust.
                        tracing::warn!("Dropping malformed member event: {}", e);
                        return self.entries.remove(&event.key).is_some();
                    }
                };

                let member = Member {
                    address,
                    lease_id: event.lease_id,
                };

                match self.entries.insert(event.key.clone(), member.clone()) {
                    Some(previous) => previous != member,
                    None => true,
                }
            }
            EventKind::Delete => self.entries.remove(&event.key).is_some(),
        }
    }

    /// Replaces the entire member set from a full listing, atomically from the
    /// point of view of snapshot publication. Returns whether anything
    /// changed.
    pub fn resync(&mut self, listing: &[KeyValue]) -> bool {
        let mut next = BTreeMap::new();
        for kv in listing {
            match decode_host_address(&kv.key, Some(&kv.value)) {
                Ok(address) => {
                    next.insert(
                        kv.key.clone(),
                        Member {
                            address,
                            lease_id: kv.lease_id,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!("Excluding malformed member entry from resync: {}", e);
                }
            }
        }

        if next == self.entries {
            return false;
        }
        self.entries = next;
        true
    }

    /// Read-only view used by snapshot construction, ordered by registration
    /// key.
    pub fn members(&self) -> Vec<Member> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MembershipTracker {
    fn default() -> Self {
        Self::new()
    }
}
