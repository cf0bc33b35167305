//! Configurable rate limiter facade.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::backend::{Decision, RateLimiterBackend};
use super::fixed_window::FixedWindowLimiter;
use super::token_bucket::TokenBucketLimiter;
use crate::clock::{Clock, SystemClock};
use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::store::KeyValueStore;

#[derive(Debug)]
enum Strategy {
    TokenBucket(TokenBucketLimiter),
    FixedWindow(FixedWindowLimiter),
}

/// The rate limiter, running whichever algorithm the configuration selects.
///
/// This struct holds no per-identity state; it can be shared across tasks
/// and any number of instances may point at the same store.
#[derive(Debug)]
pub struct RateLimiter {
    strategy: Strategy,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock.
    pub fn new(config: &LimiterConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a rate limiter reading time from `clock`.
    pub fn with_clock(
        config: &LimiterConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let strategy = match config.algorithm {
            Algorithm::TokenBucket => {
                Strategy::TokenBucket(TokenBucketLimiter::new(config, store, clock)?)
            }
            Algorithm::FixedWindow => Strategy::FixedWindow(FixedWindowLimiter::new(config, store)?),
        };

        info!(
            instance = %config.instance_id,
            algorithm = ?config.algorithm,
            capacity = config.capacity,
            refill_rate = config.refill_rate,
            refill_interval_ms = config.refill_interval_ms,
            encode_keys = config.encode_keys,
            "Rate limiter initialized"
        );

        Ok(Self { strategy })
    }

    /// The algorithm this limiter runs.
    pub fn algorithm(&self) -> Algorithm {
        match self.strategy {
            Strategy::TokenBucket(_) => Algorithm::TokenBucket,
            Strategy::FixedWindow(_) => Algorithm::FixedWindow,
        }
    }

    fn backend(&self) -> &dyn RateLimiterBackend {
        match &self.strategy {
            Strategy::TokenBucket(limiter) => limiter as &dyn RateLimiterBackend,
            Strategy::FixedWindow(limiter) => limiter as &dyn RateLimiterBackend,
        }
    }
}

#[async_trait]
impl RateLimiterBackend for RateLimiter {
    async fn check(&self, identity: &str, cost: u64) -> Result<Decision> {
        self.backend().check(identity, cost).await
    }

    fn limit(&self) -> u64 {
        self.backend().limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TollgateError;
    use crate::store::MemoryStore;
    use crate::test_support::fixed_clock;
    use std::time::Duration;

    fn config(algorithm: Algorithm) -> LimiterConfig {
        LimiterConfig {
            algorithm,
            capacity: 3,
            refill_rate: 1,
            refill_interval_ms: 1000,
            encode_keys: true,
            ..LimiterConfig::default()
        }
    }

    #[tokio::test]
    async fn test_selects_token_bucket() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(&config(Algorithm::TokenBucket), store).unwrap();

        assert_eq!(limiter.algorithm(), Algorithm::TokenBucket);
        assert_eq!(limiter.limit(), 3);
    }

    #[tokio::test]
    async fn test_selects_fixed_window() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(&config(Algorithm::FixedWindow), store).unwrap();

        assert_eq!(limiter.algorithm(), Algorithm::FixedWindow);
    }

    #[tokio::test]
    async fn test_both_algorithms_enforce_capacity() {
        for algorithm in [Algorithm::TokenBucket, Algorithm::FixedWindow] {
            let clock = fixed_clock();
            let store = Arc::new(MemoryStore::with_clock(clock.clone()));
            let limiter = RateLimiter::with_clock(&config(algorithm), store, clock.clone()).unwrap();

            for _ in 0..3 {
                assert!(limiter.is_allowed("10.1.2.3", 1).await, "{:?}", algorithm);
            }
            assert!(!limiter.is_allowed("10.1.2.3", 1).await, "{:?}", algorithm);

            clock.advance(Duration::from_secs(1));
            assert!(limiter.is_allowed("10.1.2.3", 1).await, "{:?}", algorithm);
        }
    }

    #[tokio::test]
    async fn test_instances_share_state_through_store() {
        let clock = fixed_clock();
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let cfg = config(Algorithm::TokenBucket);
        let a = RateLimiter::with_clock(&cfg, store.clone(), clock.clone()).unwrap();
        let b = RateLimiter::with_clock(&cfg, store, clock).unwrap();

        assert!(a.is_allowed("client", 2).await);
        assert!(b.is_allowed("client", 1).await);
        assert!(!a.is_allowed("client", 1).await);
        assert!(!b.is_allowed("client", 1).await);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store = Arc::new(MemoryStore::new());
        let cfg = LimiterConfig {
            capacity: 0,
            ..LimiterConfig::default()
        };
        assert!(matches!(
            RateLimiter::new(&cfg, store),
            Err(TollgateError::Config(_))
        ));
    }
}
