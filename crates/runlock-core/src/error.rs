//! Error types shared by every `runlock` crate.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the lock coordinator and its supporting components.
///
/// Body failures are intentionally **not** a variant here: per the
/// coordinator's contract, whatever the caller's critical section returns
/// (success or failure) is propagated verbatim, never wrapped.
#[derive(Debug, Error, Clone)]
pub enum LockError {
    /// The acquisition retry budget (attempts or total wait time) was
    /// exhausted before a lease could be obtained.
    #[error(
        "failed to acquire lock for resources \"{resources}\" after {attempts} attempt(s), waited {total_wait_time:?}"
    )]
    AcquisitionTimeout {
        /// Canonical form of the resource set that could not be locked.
        resources: String,
        /// Number of acquisition attempts made, including the first.
        attempts: usize,
        /// Total time spent waiting between attempts.
        total_wait_time: Duration,
    },

    /// A `RetryConfig` or `CoordinatorConfig` value failed validation at
    /// construction time.
    #[error("invalid lock configuration: {0}")]
    InvalidConfig(String),

    /// The coordination store could not be reached at all (as opposed to a
    /// key simply being absent or held by another token). Only raised where
    /// the store's unavailability cannot be treated as "unavailable, keep
    /// retrying" -- e.g. a connection error while establishing the very
    /// first attempt.
    #[error("lock store error: {0}")]
    Store(String),
}

impl LockError {
    /// Returns `true` if this is an [`LockError::AcquisitionTimeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::AcquisitionTimeout { .. })
    }
}
