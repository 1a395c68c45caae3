//! Distributed lock.
//!
//! A single-owner, TTL-bounded mutex keyed by inventory identifier and
//! backed by an external key-value store. Acquisition is a conditional set
//! retried a bounded number of times with a fixed delay; release is an
//! atomic compare-and-delete against the owner token, so a holder whose TTL
//! already ran out can never delete someone else's lock.
//!
//! The lock is not reentrant: acquiring a key you already hold waits on
//! yourself until the retries run out.
//!
//! ## Key format
//!
//! `{resource_type}:{resource_id}:{date}`, e.g. `room:6f1c…:2025-06-01`.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

pub use self::memory::MemoryLockStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisLockStore;
pub use crate::interfaces::{LockError, LockStore};

use crate::domain::{date_key, StayRange};

/// Resource type used for room inventory locks.
pub const ROOM_RESOURCE: &str = "room";

/// Build a lock key.
pub fn lock_key(resource_type: &str, resource_id: &impl Display, date: NaiveDate) -> String {
    format!("{}:{}:{}", resource_type, resource_id, date_key(date))
}

/// Which nights of a stay a booking locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// Lock `(room, start date)` only.
    ///
    /// Two multi-night bookings with different start dates but overlapping
    /// nights do not exclude each other. The conditional inventory update
    /// still keeps committed counters within capacity.
    #[default]
    FirstNight,
    /// Lock every night of the stay, in ascending date order.
    EveryNight,
}

impl LockScope {
    /// Lock keys for a stay, in acquisition order.
    pub fn keys_for(&self, room_id: Uuid, stay: &StayRange) -> Vec<String> {
        match self {
            LockScope::FirstNight => vec![lock_key(ROOM_RESOURCE, &room_id, stay.start())],
            LockScope::EveryNight => stay
                .nights()
                .map(|night| lock_key(ROOM_RESOURCE, &room_id, night))
                .collect(),
        }
    }
}

/// Lock configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Redis URL. In-process lock store when unset.
    pub redis_url: Option<String>,
    /// Namespace prepended to every Redis key.
    pub key_prefix: Option<String>,
    /// Lock TTL in milliseconds. Default: 10000.
    pub ttl_ms: u64,
    /// Attempts after the first before giving up. Default: 5.
    pub retry_attempts: usize,
    /// Fixed delay between attempts in milliseconds. Default: 100.
    pub retry_delay_ms: u64,
    /// Which nights a booking locks. Default: first_night.
    pub scope: LockScope,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: None,
            ttl_ms: 10_000,
            retry_attempts: 5,
            retry_delay_ms: 100,
            scope: LockScope::FirstNight,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Build the lock store selected by configuration.
pub async fn init_lock_store(config: &LockConfig) -> Result<Arc<dyn LockStore>, LockError> {
    match &config.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => Ok(Arc::new(
            RedisLockStore::new(url, config.key_prefix.as_deref()).await?,
        )),
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(LockError::Backend(
            "lock.redis_url is set but this build lacks the `redis` feature".to_string(),
        )),
        None => {
            warn!("No lock.redis_url configured, using in-process lock store");
            Ok(Arc::new(MemoryLockStore::new()))
        }
    }
}

/// Distributed mutex over a [`LockStore`].
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    ttl: Duration,
    retry_attempts: usize,
    retry_delay: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>, config: &LockConfig) -> Self {
        Self {
            store,
            ttl: config.ttl(),
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay(),
        }
    }

    /// Take the lock on `key`, retrying with a fixed delay.
    ///
    /// Fails with [`LockError::Busy`] once the attempts are used up. Store
    /// errors are returned immediately.
    #[tracing::instrument(name = "lock.acquire", skip(self))]
    pub async fn acquire(&self, key: &str) -> Result<LockGuard, LockError> {
        let token = Uuid::new_v4().to_string();
        let backoff = ConstantBuilder::default()
            .with_delay(self.retry_delay)
            .with_max_times(self.retry_attempts)
            .build();

        let mut attempts = 0;
        for delay in std::iter::once(Duration::ZERO).chain(backoff) {
            if attempts > 0 {
                tokio::time::sleep(delay).await;
            }
            attempts += 1;

            if self.store.set_if_absent(key, &token, self.ttl).await? {
                debug!(attempts, "Lock acquired");
                return Ok(LockGuard {
                    store: Arc::clone(&self.store),
                    key: key.to_string(),
                    token,
                    released: false,
                });
            }
        }

        warn!(attempts, "Lock still held, giving up");
        Err(LockError::Busy {
            key: key.to_string(),
            attempts,
        })
    }

    /// Take several locks in the given order.
    ///
    /// On failure every lock already taken is released before returning.
    pub async fn acquire_all(&self, keys: &[String]) -> Result<Vec<LockGuard>, LockError> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            match self.acquire(key).await {
                Ok(guard) => guards.push(guard),
                Err(e) => {
                    release_all(guards).await;
                    return Err(e);
                }
            }
        }
        Ok(guards)
    }
}

/// Release every guard, logging rather than failing on store errors.
pub async fn release_all(guards: Vec<LockGuard>) {
    for guard in guards.into_iter().rev() {
        let key = guard.key().to_string();
        if let Err(e) = guard.release().await {
            warn!(key = %key, error = %e, "Lock release failed, key expires with its TTL");
        }
    }
}

/// Proof of lock ownership.
///
/// Call [`LockGuard::release`] when done. A guard dropped without release
/// (early return, `?`, panic, cancelled future) schedules the release on the
/// current runtime; outside a runtime the TTL frees the key.
pub struct LockGuard {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    released: bool,
}

// The token is the proof of ownership; keep it out of logs.
impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock. Returns `false` if it had already expired and
    /// possibly passed to another owner, in which case nothing was deleted.
    pub async fn release(mut self) -> Result<bool, LockError> {
        self.released = true;
        let deleted = self.store.delete_if_owner(&self.key, &self.token).await?;
        if deleted {
            debug!(key = %self.key, "Lock released");
        } else {
            warn!(key = %self.key, "Lock expired before release");
        }
        Ok(deleted)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.delete_if_owner(&key, &token).await {
                        warn!(key = %key, error = %e, "Deferred lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "Lock guard dropped outside runtime, key expires with its TTL");
            }
        }
    }
}
