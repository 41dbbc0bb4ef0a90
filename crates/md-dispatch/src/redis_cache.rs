//! Redis-backed idempotency cache

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::cache::IdempotencyCache;
use crate::error::{DispatchError, Result};

pub struct RedisIdempotencyCache {
    conn: ConnectionManager,
}

impl RedisIdempotencyCache {
    /// Connect and verify the server answers PING
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| DispatchError::Config(format!("invalid redis url: {}", e)))?;
        let mut conn = ConnectionManager::new(client).await?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Connected to Redis idempotency cache");

        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);

        // EX needs whole seconds; anything shorter than a second is rounded up
        if !ttl.is_zero() {
            let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
            cmd.arg("EX").arg(secs);
        }

        let _: () = cmd.query_async(&mut conn).await?;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached idempotency marker");
        Ok(())
    }
}
