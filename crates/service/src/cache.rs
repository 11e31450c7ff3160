//! Redis-backed KV cache
//!
//! Production `KvCache` implementation over a shared connection manager.
//! Embedded deployments and tests use `engram_core::InMemoryKvCache`
//! instead.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use engram_core::{KvCache, MemoryError, Result};

pub struct RedisKvCache {
    manager: ConnectionManager,
}

fn map_err(e: redis::RedisError) -> MemoryError {
    if e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() {
        MemoryError::transient("kv_cache", e.to_string())
    } else {
        MemoryError::permanent("kv_cache", e.to_string())
    }
}

impl RedisKvCache {
    /// Connect and build the shared connection manager
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| MemoryError::permanent("kv_cache", format!("invalid url: {e}")))?;
        let manager = ConnectionManager::new(client).await.map_err(map_err)?;
        info!("redis KV cache connected");
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvCache for RedisKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(map_err),
            None => redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(map_err),
        }
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.manager.clone();
        let seconds: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        // -2 = missing key, -1 = no expiry.
        Ok((seconds >= 0).then(|| Duration::from_secs(seconds as u64)))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(reply.is_some())
    }
}
