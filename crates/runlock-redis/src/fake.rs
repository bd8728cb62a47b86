//! An in-memory [`LeaseStore`] for deterministic coordinator tests that
//! don't need a real Redis-compatible server.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::store::{AcquireOutcome, ExtendOutcome, LeaseStore};

struct Lease {
    token: Vec<u8>,
    expires_at: Instant,
}

/// A `Mutex<HashMap<..>>`-backed [`LeaseStore`]. Expiry is checked lazily on
/// each access rather than via a background sweep, which is sufficient for
/// single-process tests.
#[derive(Default)]
pub struct FakeLeaseStore {
    leases: Mutex<HashMap<String, Lease>>,
}

impl FakeLeaseStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(lease: &Lease, now: Instant) -> bool {
        lease.expires_at > now
    }
}

#[async_trait]
impl LeaseStore for FakeLeaseStore {
    async fn try_acquire(
        &self,
        keys: &[String],
        token: &[u8],
        ttl: Duration,
    ) -> Result<AcquireOutcome, runlock_core::LockError> {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap();

        let mut acquired_keys: Vec<String> = Vec::with_capacity(keys.len());
        for key in keys {
            let occupied = leases
                .get(key)
                .map(|lease| Self::is_live(lease, now))
                .unwrap_or(false);

            if occupied {
                for acquired_key in &acquired_keys {
                    leases.remove(acquired_key);
                }
                return Ok(AcquireOutcome::Unavailable);
            }

            leases.insert(
                key.clone(),
                Lease {
                    token: token.to_vec(),
                    expires_at: now + ttl,
                },
            );
            acquired_keys.push(key.clone());
        }

        Ok(AcquireOutcome::Acquired)
    }

    async fn release(&self, keys: &[String], token: &[u8]) {
        let mut leases = self.leases.lock().unwrap();
        for key in keys {
            if leases.get(key).map(|l| l.token.as_slice()) == Some(token) {
                leases.remove(key);
            }
        }
    }

    async fn extend(&self, keys: &[String], token: &[u8], new_ttl: Duration) -> ExtendOutcome {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap();

        for key in keys {
            match leases.get_mut(key) {
                Some(lease) if lease.token == token && Self::is_live(lease, now) => {
                    lease.expires_at = now + new_ttl;
                }
                _ => return ExtendOutcome::Lost,
            }
        }

        ExtendOutcome::Extended
    }
}
