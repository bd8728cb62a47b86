//! A distributed mutual-exclusion facility built atop a Redis-compatible
//! key/value store.
//!
//! [`RunLocker`] is the public façade: it takes a lock name and a set of
//! resource identifiers, acquires an exclusive lease over all of them
//! (retrying with backoff under contention), keeps the lease alive for the
//! duration of the caller's critical section via a background
//! auto-extension task, and releases it on every exit path. Nested
//! acquisitions of the *same* resources from the same logical caller are
//! detected and bypass the store entirely -- see [`reentrancy`].

mod canonical;
mod coordinator;
mod error;
pub mod events;
pub mod reentrancy;

pub use coordinator::{CoordinatorConfig, CoordinatorConfigBuilder, RunLocker};
pub use error::LockOrBodyError;
pub use reentrancy::{current_resources, is_inside_lock};
