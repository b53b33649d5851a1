//! Participant Registration
//!
//! The write side of the directory: a process that hosts cluster state (as
//! opposed to a pure reader of the query surface) uses this module to make
//! itself visible. It acquires a TTL lease, publishes its address under the
//! members prefix, optionally campaigns for the leader key, and keeps the
//! lease renewed on a timer.
//!
//! A lease that lapses server-side is ordinary membership loss: the rest of
//! the cluster observes it through the normal watch path, and this module's
//! only duty is to stop claiming leadership, reacquire, and re-register.

pub mod service;

pub use service::Registrar;
