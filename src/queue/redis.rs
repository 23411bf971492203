//! Redis-backed store using a `deadpool-redis` connection pool

use crate::QUEUE_TARGET;
use crate::queue::{KeyValueStore, StoreError, StoreResult};
use deadpool_redis::{Config, Connection, Pool, Runtime, redis::AsyncCommands};
use std::time::Duration;
use tracing::{debug, info};

/// Where to find the Redis server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisOptions {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

impl RedisOptions {
    /// Connection URL, e.g. `redis://localhost:6379/0`
    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Store backed by a Redis database
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Create the connection pool; no connection is made until first use
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Connection` if the pool cannot be created.
    pub fn new(options: &RedisOptions) -> StoreResult<Self> {
        let url = options.url();
        debug!(target: QUEUE_TARGET, url = %url, "Creating Redis pool");
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Connection(format!("Failed to create Redis pool: {e}")))?;
        Ok(Self { pool })
    }

    /// Check that the server answers
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the server cannot be reached.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let reply = deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| StoreError::operation("PING", e))?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::operation("PING", format!("unexpected reply {reply}")))
        }
    }

    async fn connection(&self) -> StoreResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let added: i64 = conn
            .sadd(key, member)
            .await
            .map_err(|e| StoreError::operation("SADD", e))?;
        Ok(added > 0)
    }

    async fn set_is_member(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        conn.sismember(key, member)
            .await
            .map_err(|e| StoreError::operation("SISMEMBER", e))
    }

    async fn set_len(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection().await?;
        conn.scard(key)
            .await
            .map_err(|e| StoreError::operation("SCARD", e))
    }

    async fn set_pop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection().await?;
        conn.spop(key)
            .await
            .map_err(|e| StoreError::operation("SPOP", e))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get(key)
            .await
            .map_err(|e| StoreError::operation("GET", e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        match ttl {
            // SETEX rejects a zero expiry
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_secs().max(1))
                    .await
                    .map_err(|e| StoreError::operation("SETEX", e))?;
            }
            None => {
                let _: () = conn
                    .set(key, value)
                    .await
                    .map_err(|e| StoreError::operation("SET", e))?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| StoreError::operation("DEL", e))?;
        Ok(())
    }

    async fn persist(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        deadpool_redis::redis::cmd("SAVE")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::operation("SAVE", e))?;
        info!(target: QUEUE_TARGET, "Redis database saved");
        Ok(())
    }
}
