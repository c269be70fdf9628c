//! Redis-backed [`SharedCache`] (feature `redis`).
//!
//! `add` maps to `SET key value NX EX ttl`, which Redis executes atomically,
//! so every scheduler node pointed at the same Redis shares one lock space.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, error, info};

use crate::{
    cache::SharedCache,
    error::{LockError, Result},
    memory::MAX_TTL_SECS,
};

pub struct RedisCache {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(backend)?;
        let mut conn = client.get_connection_manager().await.map_err(backend)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        info!("connected to redis lock cache");
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
        })
    }

    fn build_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }
}

fn backend(e: redis::RedisError) -> LockError {
    error!(error = %e, "redis command failed");
    LockError::Backend(e.to_string())
}

// Redis rejects EX 0 and expiries past i64 milliseconds.
fn ttl_arg(ttl_secs: u64) -> u64 {
    ttl_secs.clamp(1, MAX_TTL_SECS)
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn add(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        // SET NX replies OK when stored and nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_arg(ttl_secs))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        debug!(key = %full_key, added = reply.is_some(), "redis SET NX");
        Ok(reply.is_some())
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("SETEX")
            .arg(&full_key)
            .arg(ttl_arg(ttl_secs))
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let _: i64 = redis::cmd("DEL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let n: i64 = redis::cmd("EXISTS")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(n > 0)
    }
}
