//! Rate limiter trait for abstracting over admission algorithms.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the caller may proceed
    pub allowed: bool,
    /// Bucket capacity (or window quota)
    pub limit: u64,
    /// Tokens left after this check
    pub remaining: u64,
}

impl Decision {
    /// A denial that consumed nothing and reports no remaining budget.
    pub fn denied(limit: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
        }
    }
}

/// Trait for rate limiter implementations.
///
/// This trait abstracts over the token-bucket and fixed-window limiters so
/// the HTTP interceptor can work with either.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Charge `cost` tokens to `identity` and report the outcome.
    ///
    /// Store failures, corrupt state and a zero cost surface as errors.
    async fn check(&self, identity: &str, cost: u64) -> Result<Decision>;

    /// Configured capacity.
    fn limit(&self) -> u64;

    /// Like [`check`](Self::check), but any error becomes a denial.
    async fn decide(&self, identity: &str, cost: u64) -> Decision {
        match self.check(identity, cost).await {
            Ok(decision) => decision,
            Err(e) => {
                debug!(error = %e, "Failing closed");
                Decision::denied(self.limit())
            }
        }
    }

    /// Whether `identity` may spend `cost` tokens now. Fails closed.
    async fn is_allowed(&self, identity: &str, cost: u64) -> bool {
        self.decide(identity, cost).await.allowed
    }
}
