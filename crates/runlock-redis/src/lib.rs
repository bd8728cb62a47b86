//! Redis-backed Redlock client.
//!
//! Implements the atomic single-store leasing primitives the lock
//! coordinator relies on: create-if-absent with a TTL, compare-and-delete,
//! and compare-and-extend. See [`LeaseStore`] for the trait the coordinator
//! actually depends on, and [`RedisLeaseStore`] for the production
//! implementation against a real Redis-compatible server.

mod fake;
mod store;

pub use fake::FakeLeaseStore;
pub use store::{AcquireOutcome, ExtendOutcome, LeaseStore, RedisLeaseStore};
