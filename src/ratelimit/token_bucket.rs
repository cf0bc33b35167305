//! Token-bucket limiter over a shared key-value store.
//!
//! Each identity's bucket lives in the store as two keys: the integer token
//! count and the RFC-3339 time of the last refill. A check reads both,
//! credits whole elapsed refill intervals, charges the cost if it fits, and
//! writes both back. Refill is computed lazily on every check, so instances
//! sharing a store need nothing but wall-clock time to agree.
//!
//! The read-modify-write sequence is serialized per key within one limiter
//! instance. It is not atomic across instances: concurrent checks for one
//! identity from separate processes can admit slightly more than the limit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use tracing::{debug, error, trace};

use super::backend::{Decision, RateLimiterBackend};
use super::key::{BucketKey, KeyPolicy};
use super::lock::KeyLocks;
use crate::clock::Clock;
use crate::config::LimiterConfig;
use crate::error::{Result, TollgateError};
use crate::store::KeyValueStore;

/// Bucket state after lazy refill, before the cost is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Refill {
    tokens: u64,
    last_refill: DateTime<Utc>,
}

/// A distributed token-bucket rate limiter.
pub struct TokenBucketLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    keys: KeyPolicy,
    locks: KeyLocks,
    capacity: u64,
    refill_rate: u64,
    refill_interval: Duration,
    instance_id: String,
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("instance_id", &self.instance_id)
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .field("refill_interval", &self.refill_interval)
            .field("keys", &self.keys)
            .finish()
    }
}

impl TokenBucketLimiter {
    /// Create a limiter. Invalid settings are rejected here rather than
    /// discovered later as a division by zero.
    pub fn new(
        config: &LimiterConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            keys: KeyPolicy::new(config.key_prefix.clone(), config.encode_keys),
            locks: KeyLocks::new(config.lock_stripes),
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            refill_interval: config.refill_interval(),
            instance_id: config.instance_id.clone(),
        })
    }

    /// Key policy used to derive store keys.
    pub fn key_policy(&self) -> &KeyPolicy {
        &self.keys
    }

    async fn try_check(&self, key: &BucketKey, cost: u64) -> Result<Decision> {
        let refill_key = key.refill_time();
        let _guard = self.locks.lock(key.tokens()).await;
        let now = self.clock.now();

        let stored_tokens = self.store.get(key.tokens()).await?;
        let stored_refill = self.store.get(&refill_key).await?;

        // A missing bucket is a full bucket that has accrued nothing yet.
        let tokens = match stored_tokens {
            Some(raw) => parse_tokens(key.tokens(), &raw)?,
            None => self.capacity,
        };
        let last_refill = match stored_refill {
            Some(raw) => parse_timestamp(&refill_key, &raw)?,
            None => now,
        };

        let refill = self.refill(tokens, last_refill, now);
        let allowed = refill.tokens >= cost;
        let remaining = if allowed {
            refill.tokens - cost
        } else {
            refill.tokens
        };

        trace!(
            instance = %self.instance_id,
            key = %key,
            stored = tokens,
            refilled = refill.tokens,
            cost = cost,
            allowed = allowed,
            "Token bucket evaluated"
        );

        // Denials still persist the refreshed count and timestamp so accrued
        // credit survives repeated rapid checks. Both keys go in one write: a
        // new count beside an old timestamp would credit the same intervals
        // twice.
        let remaining_raw = remaining.to_string();
        let refill_raw = format_timestamp(refill.last_refill);
        self.store
            .set_many(&[
                (refill_key.as_str(), refill_raw.as_str()),
                (key.tokens(), remaining_raw.as_str()),
            ])
            .await?;

        if !allowed {
            debug!(
                instance = %self.instance_id,
                key = %key,
                tokens = refill.tokens,
                cost = cost,
                "Rate limit exceeded"
            );
        }

        Ok(Decision {
            allowed,
            limit: self.capacity,
            remaining,
        })
    }

    /// Credit `floor(elapsed / interval) * rate` tokens, clamped to capacity.
    ///
    /// The refill time advances by whole intervals only, keeping the
    /// remainder for the next check. A full bucket restarts its refill clock
    /// at `now`. The refill time never moves backwards.
    ///
    /// The stored `_lastRefillTime` is therefore `last + n * interval`, not
    /// the time of the check, unless the bucket came out full.
    fn refill(&self, tokens: u64, last_refill: DateTime<Utc>, now: DateTime<Utc>) -> Refill {
        let tokens = tokens.min(self.capacity);
        let elapsed_ns: u128 = match (now - last_refill).num_nanoseconds() {
            Some(ns) if ns > 0 => ns as u128,
            Some(_) => 0,
            // Too far apart to count in nanoseconds; certainly long enough.
            None if now > last_refill => u128::from(u64::MAX),
            None => 0,
        };
        let interval_ns = self.refill_interval.as_nanos();
        let intervals = elapsed_ns / interval_ns;

        let refilled = u128::from(tokens)
            .saturating_add(intervals.saturating_mul(u128::from(self.refill_rate)))
            .min(u128::from(self.capacity)) as u64;

        let last_refill = if refilled == self.capacity {
            now.max(last_refill)
        } else {
            let credited = i64::try_from(intervals * interval_ns)
                .map(TimeDelta::nanoseconds)
                .unwrap_or_else(|_| TimeDelta::zero());
            last_refill + credited
        };

        Refill {
            tokens: refilled,
            last_refill,
        }
    }
}

#[async_trait]
impl RateLimiterBackend for TokenBucketLimiter {
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
                "Token bucket check failed"
            );
            e
        })
    }

    fn limit(&self) -> u64 {
        self.capacity
    }
}

fn parse_tokens(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|e| {
        error!(key = %key, value = %raw, "Stored token count is not a non-negative integer");
        TollgateError::CorruptState {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        }
    })
}

fn parse_timestamp(key: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            error!(key = %key, value = %raw, "Stored refill timestamp is not RFC-3339");
            TollgateError::CorruptState {
                key: key.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }
        })
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
