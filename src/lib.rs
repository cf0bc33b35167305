//! Tollgate - Distributed Rate Limiting
//!
//! This crate decides whether a caller may proceed based on a token bucket
//! (or fixed window) kept in a shared key-value store, so any number of
//! stateless service instances enforce one consistent limit. An axum
//! middleware turns the decision into a pass-through or a `429` response.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;

#[cfg(test)]
mod test_support;
