//! Query Service
//!
//! The read-only HTTP surface over the directory cache. Both operations are
//! pure reads of the last published snapshot: no request ever touches the
//! coordination backend, blocks on snapshot construction, or fails for a
//! reason internal to the cache. An absent leader and an empty member list are
//! valid cluster states and produce well-formed 200 responses.

pub mod handlers;
pub mod protocol;

mod tests;
