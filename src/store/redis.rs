//! Redis-backed store shared by every limiter instance.

use std::future::Future;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use tracing::{debug, info};

use super::KeyValueStore;
use crate::error::{Result, TollgateError};

/// A [`KeyValueStore`] talking to a Redis server.
///
/// Every call is bounded by `timeout`; the connection manager reconnects on
/// its own, but no call is retried here.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to the server at `url`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(TollgateError::Config("store timeout must be greater than zero".into()));
        }

        info!(timeout = ?timeout, "Connecting to Redis store");
        let client = ::redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| TollgateError::StoreTimeout(timeout))??;
        info!("Redis store connected");

        Ok(Self { conn, timeout })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = ::redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(TollgateError::from),
            Err(_) => {
                debug!(op = op, timeout = ?self.timeout, "Redis call timed out");
                Err(TollgateError::StoreTimeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded("GET", async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            // PX rejects zero, so round sub-millisecond expiries up.
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }
        self.bounded("SET", async move {
            let reply: ::redis::RedisResult<()> = cmd.query_async(&mut conn).await;
            reply
        })
        .await
    }

    async fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        // MSET applies every pair atomically.
        let mut cmd = ::redis::cmd("MSET");
        for (key, value) in pairs {
            cmd.arg(*key).arg(*value);
        }
        self.bounded("MSET", async move {
            let reply: ::redis::RedisResult<()> = cmd.query_async(&mut conn).await;
            reply
        })
        .await
    }

    async fn decr_by(&self, key: &str, amount: u64) -> Result<i64> {
        let mut conn = self.conn.clone();
        self.bounded("DECRBY", async move { conn.decr(key, amount).await })
            .await
    }
}
