//! Core infrastructure for `runlock`, a distributed mutual-exclusion
//! facility built atop a Redis-compatible key/value store.
//!
//! This crate provides the pieces shared by every other `runlock` crate:
//! - [`error::LockError`], the unified error type for configuration and
//!   acquisition-timeout failures.
//! - [`events`], a listener-based observability mechanism.
//! - [`retry::RetryConfig`], the pure Retry Policy Engine that computes
//!   backoff delays and tracks the cumulative wait-time budget.

pub mod error;
pub mod events;
pub mod retry;

pub use error::LockError;
pub use events::{EventListener, LockEvent};
pub use retry::{RetryConfig, RetryConfigBuilder};
