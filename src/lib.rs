//! Cluster Directory Library
//!
//! This library crate defines the core modules of the leader & membership
//! directory service. It serves as the foundation for the binary executable
//! (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of four loosely coupled subsystems:
//!
//! - **`backend`**: The coordination-store boundary. Defines the lease/watch
//!   contract every backend must provide (acquire, renew, campaign, watch) and
//!   ships an in-process reference implementation used for single-node runs
//!   and tests.
//! - **`directory`**: The leader & membership cache. Consumes watch events from
//!   the backend, folds them into an immutable versioned `Snapshot`, and keeps
//!   serving the last known view while the backend is unreachable.
//! - **`registration`**: The participant side. A node that hosts cluster state
//!   uses this module to acquire a lease, publish its address, campaign for
//!   leadership, and keep its lease renewed.
//! - **`query`**: The read-only HTTP surface. Answers "who is the leader" and
//!   "who are the members" from the published snapshot without ever touching
//!   the backend on the request path.

pub mod backend;
pub mod directory;
pub mod query;
pub mod registration;
