//! Redis-backed lock store
//!
//! Acquisition is `SET key token NX PX ttl`. Release and extension are Lua
//! scripts so the token comparison and the mutation run as one atomic step on
//! the server.

use crate::error::Result;
use crate::store::{LockStore, validate_ttl};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;

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

/// Lock store over a shared Redis connection
#[derive(Clone)]
pub struct RedisLockStore {
    connection: ConnectionManager,
    release: Script,
    extend: Script,
}

impl RedisLockStore {
    /// Connect to `redis_url` with a bounded connection timeout
    pub async fn connect(redis_url: &str, connection_timeout: Duration) -> Result<Self> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Some(connection_timeout));

        let client = Client::open(redis_url)?;
        let connection = client.get_connection_manager_with_config(config).await?;

        tracing::info!("Connected lock store to {}", redis_url);
        Ok(Self::with_connection(connection))
    }

    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            release: Script::new(RELEASE_SCRIPT),
            extend: Script::new(EXTEND_SCRIPT),
        }
    }
}

fn ttl_millis(ttl: Duration) -> Result<u64> {
    validate_ttl(ttl)?;
    Ok(ttl.as_millis() as u64)
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut connection = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl)?)
            .query_async(&mut connection)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut connection)
            .await?;
        Ok(deleted == 1)
    }

    async fn compare_and_extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut connection = self.connection.clone();
        let extended: i64 = self
            .extend
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl)?)
            .invoke_async(&mut connection)
            .await?;
        Ok(extended == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        let token: Option<String> = connection.get(key).await?;
        Ok(token)
    }
}
