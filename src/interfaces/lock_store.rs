//! Lock storage interface.

use std::time::Duration;

use async_trait::async_trait;

/// Errors that can occur while taking or releasing a lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock '{key}' still held after {attempts} attempts")]
    Busy { key: String, attempts: usize },

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lock backend unavailable: {0}")]
    Backend(String),
}

/// Key-value store backing the distributed lock.
///
/// Implementations:
/// - `RedisLockStore`: Redis `SET NX PX` plus a compare-and-delete script
///   (`redis` feature)
/// - `MemoryLockStore`: In-process map for tests and single-node runs
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Store `token` under `key` with a TTL, only if `key` is absent.
    ///
    /// Returns `true` if this call created the entry.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Delete `key` only if it still holds `token`, as one atomic step.
    ///
    /// Returns `true` if the entry was deleted.
    async fn delete_if_owner(&self, key: &str, token: &str) -> Result<bool, LockError>;
}
