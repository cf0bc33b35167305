//! Fixed-window counter over a shared key-value store.
//!
//! The first check in a window writes `capacity - cost` with an expiry of one
//! window; later checks decrement it while enough budget is left. The window
//! resets when the store expires the key, which makes this variant bursty at
//! window boundaries compared to the token bucket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, trace};

use super::backend::{Decision, RateLimiterBackend};
use super::key::{BucketKey, KeyPolicy};
use super::lock::KeyLocks;
use crate::config::LimiterConfig;
use crate::error::{Result, TollgateError};
use crate::store::KeyValueStore;

/// A distributed fixed-window rate limiter.
pub struct FixedWindowLimiter {
    store: Arc<dyn KeyValueStore>,
    keys: KeyPolicy,
    locks: KeyLocks,
    capacity: u64,
    window: Duration,
    instance_id: String,
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("instance_id", &self.instance_id)
            .field("capacity", &self.capacity)
            .field("window", &self.window)
            .field("keys", &self.keys)
            .finish()
    }
}

impl FixedWindowLimiter {
    /// Create a limiter whose window is the configured refill interval.
    pub fn new(config: &LimiterConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            keys: KeyPolicy::new(config.key_prefix.clone(), config.encode_keys),
            locks: KeyLocks::new(config.lock_stripes),
            capacity: config.capacity,
            window: config.refill_interval(),
            instance_id: config.instance_id.clone(),
        })
    }

    /// Key policy used to derive store keys.
    pub fn key_policy(&self) -> &KeyPolicy {
        &self.keys
    }

    async fn try_check(&self, key: &BucketKey, cost: u64) -> Result<Decision> {
        let _guard = self.locks.lock(key.tokens()).await;

        let decision = match self.store.get(key.tokens()).await? {
            None => self.open_window(key, cost).await?,
            Some(raw) => {
                let left = parse_counter(key.tokens(), &raw)?;
                if left >= 0 && left as u64 >= cost {
                    let after = self.store.decr_by(key.tokens(), cost).await?;
                    if after < 0 {
                        // The key expired between GET and DECRBY; the
                        // decrement recreated it without a TTL.
                        self.open_window(key, cost).await?
                    } else {
                        self.decision(true, after as u64)
                    }
                } else {
                    self.decision(false, left.max(0) as u64)
                }
            }
        };

        trace!(
            instance = %self.instance_id,
            key = %key,
            cost = cost,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Fixed window evaluated"
        );
        if !decision.allowed {
            debug!(instance = %self.instance_id, key = %key, cost = cost, "Rate limit exceeded");
        }
        Ok(decision)
    }

    async fn open_window(&self, key: &BucketKey, cost: u64) -> Result<Decision> {
        if cost > self.capacity {
            return Ok(self.decision(false, self.capacity));
        }
        let left = self.capacity - cost;
        self.store
            .set(key.tokens(), &left.to_string(), Some(self.window))
            .await?;
        Ok(self.decision(true, left))
    }

    fn decision(&self, allowed: bool, remaining: u64) -> Decision {
        Decision {
            allowed,
            limit: self.capacity,
            remaining,
        }
    }
}

#[async_trait]
impl RateLimiterBackend for FixedWindowLimiter {
    async fn check(&self, identity: &str, cost: u64) -> Result<Decision> {
        if cost == 0 {
            return Err(TollgateError::InvalidCost(cost));
        }

        let key = self.keys.key_for(identity);
        self.try_check(&key, cost).await.map_err(|e| {
            error!(
                instance = %self.instance_id,
                key = %key,
                error = %e,
                "Fixed window check failed"
            );
            e
        })
    }

    fn limit(&self) -> u64 {
        self.capacity
    }
}

fn parse_counter(key: &str, raw: &str) -> Result<i64> {
    raw.trim().parse::<i64>().map_err(|e| {
        error!(key = %key, value = %raw, "Stored window counter is not an integer");
        TollgateError::CorruptState {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        }
    })
}
