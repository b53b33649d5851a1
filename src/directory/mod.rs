//! Leader & Membership Cache
//!
//! Maintains an always-available, eventually-consistent local view of cluster
//! leadership and membership, synchronized with the coordination backend
//! through watch streams.
//!
//! ## Core Mechanisms
//! - **Event folding**: two trackers fold ordered PUT/DELETE watch events into
//!   the current member set and leader record.
//! - **Snapshot publication**: every applied change builds a new immutable
//!   `Snapshot` and publishes it by reference swap; readers never block on the
//!   backend and never observe a half-applied update.
//! - **Resync**: after any watch interruption the trackers are rebuilt from a
//!   full listing (members) or a point read (leader) before incremental
//!   updates resume, which corrects for deletions missed while disconnected.

pub mod leader;
pub mod membership;
pub mod snapshot;
pub mod sync;
pub mod types;


pub use leader::LeaderResolver;
pub use membership::MembershipTracker;
pub use snapshot::SnapshotCache;
pub use sync::{DirectorySync, SyncStatus};
pub use types::{HostAddress, LeaderRecord, Member, Snapshot, SyncState};
