//! Admission logic over shared limiter state.

mod backend;
mod fixed_window;
mod key;
mod limiter;
mod lock;
mod token_bucket;

pub use backend::{Decision, RateLimiterBackend};
pub use fixed_window::FixedWindowLimiter;
pub use key::{decode_identity, encode_identity, BucketKey, KeyPolicy, REFILL_TIME_SUFFIX};
pub use limiter::RateLimiter;
pub use lock::KeyLocks;
pub use token_bucket::TokenBucketLimiter;
