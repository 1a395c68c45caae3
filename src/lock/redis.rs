//! Redis LockStore implementation.
//!
//! Acquisition is a single `SET key token NX PX ttl`. Release runs a Lua
//! script so the ownership check and the delete happen atomically on the
//! server.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Script};
use tracing::{debug, info};

use crate::interfaces::{LockError, LockStore};

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis implementation of LockStore.
///
/// Key format: `{prefix}:lock:{key}` when a prefix is configured,
/// otherwise the lock key itself.
pub struct RedisLockStore {
    conn: ConnectionManager,
    key_prefix: Option<String>,
    release: Script,
}

impl RedisLockStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    /// * `key_prefix` - Namespace for lock keys, none by default
    pub async fn new(url: &str, key_prefix: Option<&str>) -> Result<Self, LockError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for locks");

        Ok(Self {
            conn,
            key_prefix: key_prefix.map(str::to_string),
            release: Script::new(RELEASE_SCRIPT),
        })
    }

    fn redis_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:lock:{}", prefix, key),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.redis_key(key))
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn delete_if_owner(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();

        let deleted: i64 = self
            .release
            .key(self.redis_key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        debug!(key = %key, deleted, "Ran lock release script");
        Ok(deleted == 1)
    }
}
