//! The [`LeaseStore`] trait and its Redis-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, Script};
#[cfg(feature = "tracing")]
use tracing::{debug, warn};

/// Outcome of a [`LeaseStore::try_acquire`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Every key in the request was inserted with the given token.
    Acquired,
    /// At least one key was already held; any keys this call did insert
    /// have already been rolled back before returning.
    Unavailable,
}

/// Outcome of a [`LeaseStore::extend`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    /// Every key's TTL was refreshed.
    Extended,
    /// At least one key no longer carried the expected token (expired or
    /// stolen). The lease is considered lost for every key in the request.
    Lost,
}

/// The atomic leasing primitives a lock coordinator needs from its
/// coordination store.
///
/// Implementors must guarantee that `release` and `extend` are atomic
/// *per key* at the store -- a read of the current value followed by a
/// conditional delete/TTL-set must happen as one indivisible step, never a
/// read followed by a separate write.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Attempts to atomically create every key in `keys` with `token` as its
    /// value and `ttl` as its expiry, succeeding only if all keys were
    /// absent. On partial success, every key this call did insert is rolled
    /// back before returning `Unavailable`.
    async fn try_acquire(
        &self,
        keys: &[String],
        token: &[u8],
        ttl: Duration,
    ) -> Result<AcquireOutcome, runlock_core::LockError>;

    /// Atomically deletes each key in `keys` iff its current value equals
    /// `token`. A mismatched or absent key is silently ignored -- the lease
    /// has already expired or been taken by someone else. Store-level
    /// failures are logged, never surfaced (spec: release runs on every
    /// exit path and must not itself become a new failure mode).
    async fn release(&self, keys: &[String], token: &[u8]);

    /// Atomically refreshes the TTL of each key in `keys` to `new_ttl` iff
    /// its current value equals `token`. If any key fails, the lease is
    /// considered lost for the whole set.
    async fn extend(&self, keys: &[String], token: &[u8], new_ttl: Duration) -> ExtendOutcome;
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// A [`LeaseStore`] backed by a real Redis-compatible server, using `SET …
/// NX PX` for acquisition and Lua scripts for the compare-and-act release
/// and extend operations.
pub struct RedisLeaseStore {
    client: Client,
}

impl RedisLeaseStore {
    /// Wraps an already-configured [`redis::Client`].
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Opens a new client from a connection URL (e.g.
    /// `redis://127.0.0.1:6379/`).
    pub fn open(redis_url: &str) -> redis::RedisResult<Self> {
        Ok(Self::new(Client::open(redis_url)?))
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn try_acquire(
        &self,
        keys: &[String],
        token: &[u8],
        ttl: Duration,
    ) -> Result<AcquireOutcome, runlock_core::LockError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| runlock_core::LockError::Store(e.to_string()))?;

        let mut acquired_keys: Vec<String> = Vec::with_capacity(keys.len());

        for key in keys {
            let set = redis::cmd("SET")
                .arg(key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis().max(1) as u64)
                .query_async::<Option<String>>(&mut conn)
                .await
                .map_err(|e| runlock_core::LockError::Store(e.to_string()))?;

            if set.is_some() {
                acquired_keys.push(key.clone());
            } else {
                #[cfg(feature = "tracing")]
                debug!(key = %key, "key already held, rolling back partial acquisition");

                self.release(&acquired_keys, token).await;
                return Ok(AcquireOutcome::Unavailable);
            }
        }

        Ok(AcquireOutcome::Acquired)
    }

    async fn release(&self, keys: &[String], token: &[u8]) {
        let Ok(mut conn) = self.client.get_multiplexed_async_connection().await else {
            #[cfg(feature = "tracing")]
            warn!("could not connect to store to release lease; will expire via TTL");
            return;
        };

        let script = Script::new(RELEASE_SCRIPT);
        for key in keys {
            let result: redis::RedisResult<i64> =
                script.key(key).arg(token).invoke_async(&mut conn).await;

            match result {
                Ok(1) => {
                    #[cfg(feature = "tracing")]
                    debug!(key = %key, "lease released");
                }
                Ok(_) => {
                    #[cfg(feature = "tracing")]
                    debug!(key = %key, "lease already gone at release time");
                }
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    warn!(key = %key, error = %_err, "store error releasing lease; will expire via TTL");
                }
            }
        }
    }

    async fn extend(&self, keys: &[String], token: &[u8], new_ttl: Duration) -> ExtendOutcome {
        let Ok(mut conn) = self.client.get_multiplexed_async_connection().await else {
            #[cfg(feature = "tracing")]
            warn!("could not connect to store to extend lease");
            return ExtendOutcome::Lost;
        };

        let script = Script::new(EXTEND_SCRIPT);
        let ttl_ms = new_ttl.as_millis().max(1) as u64;

        for key in keys {
            let result: redis::RedisResult<i64> = script
                .key(key)
                .arg(token)
                .arg(ttl_ms)
                .invoke_async(&mut conn)
                .await;

            match result {
                Ok(1) => continue,
                Ok(_) => return ExtendOutcome::Lost,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    warn!(key = %key, error = %_err, "store error extending lease");
                    return ExtendOutcome::Lost;
                }
            }
        }

        ExtendOutcome::Extended
    }
}
