//! Shared key-value store used to hold per-identity limiter state.
//!
//! The limiter keeps no bucket state of its own; every instance reads and
//! writes through a [`KeyValueStore`], so all replicas pointed at the same
//! store enforce one limit.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Minimal string key-value protocol the limiters need.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value at `key`, or `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` at `key`. With `ttl` the store drops the key once it
    /// elapses; without it the key persists.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write every `(key, value)` pair as one operation, without expiry.
    /// Either all pairs land or none do.
    async fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()>;

    /// Atomically subtract `amount` from the integer at `key` and return the
    /// new value. A missing key counts as zero. Existing expiry is kept.
    async fn decr_by(&self, key: &str, amount: u64) -> Result<i64>;
}
