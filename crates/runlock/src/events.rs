//! Coordinator-level events, emitted through [`runlock_core::events`]'s
//! listener mechanism.

use std::time::{Duration, Instant};

use runlock_core::LockEvent;

/// An event emitted by [`crate::RunLocker`] over the lifetime of a single
/// acquisition.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// A lease was granted, possibly after retries.
    Acquired {
        lock_name: String,
        resources: String,
        attempts: usize,
        total_wait_time: Duration,
        timestamp: Instant,
    },
    /// An acquisition attempt found the resources unavailable and will
    /// retry after the given delay.
    Retrying {
        lock_name: String,
        resources: String,
        attempt: usize,
        delay: Duration,
        timestamp: Instant,
    },
    /// The acquisition retry budget was exhausted.
    TimedOut {
        lock_name: String,
        resources: String,
        attempts: usize,
        total_wait_time: Duration,
        timestamp: Instant,
    },
    /// The auto-extension task successfully refreshed the lease's TTL.
    Extended {
        lock_name: String,
        resources: String,
        timestamp: Instant,
    },
    /// The auto-extension task found the lease gone or held by someone
    /// else and stopped itself.
    ExtensionLost {
        lock_name: String,
        resources: String,
        timestamp: Instant,
    },
    /// The lease was released (or found already gone) at the end of the
    /// critical section.
    Released {
        lock_name: String,
        resources: String,
        timestamp: Instant,
    },
    /// The reentrancy short-circuit fired: a nested call for the same
    /// resources bypassed the store entirely.
    Reentered {
        lock_name: String,
        resources: String,
        timestamp: Instant,
    },
}

impl LockEvent for CoordinatorEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CoordinatorEvent::Acquired { .. } => "acquired",
            CoordinatorEvent::Retrying { .. } => "retrying",
            CoordinatorEvent::TimedOut { .. } => "timed_out",
            CoordinatorEvent::Extended { .. } => "extended",
            CoordinatorEvent::ExtensionLost { .. } => "extension_lost",
            CoordinatorEvent::Released { .. } => "released",
            CoordinatorEvent::Reentered { .. } => "reentered",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CoordinatorEvent::Acquired { timestamp, .. }
            | CoordinatorEvent::Retrying { timestamp, .. }
            | CoordinatorEvent::TimedOut { timestamp, .. }
            | CoordinatorEvent::Extended { timestamp, .. }
            | CoordinatorEvent::ExtensionLost { timestamp, .. }
            | CoordinatorEvent::Released { timestamp, .. }
            | CoordinatorEvent::Reentered { timestamp, .. } => *timestamp,
        }
    }

    fn lock_name(&self) -> &str {
        match self {
            CoordinatorEvent::Acquired { lock_name, .. }
            | CoordinatorEvent::Retrying { lock_name, .. }
            | CoordinatorEvent::TimedOut { lock_name, .. }
            | CoordinatorEvent::Extended { lock_name, .. }
            | CoordinatorEvent::ExtensionLost { lock_name, .. }
            | CoordinatorEvent::Released { lock_name, .. }
            | CoordinatorEvent::Reentered { lock_name, .. } => lock_name,
        }
    }
}
