//! Store doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::clock::ManualClock;
use crate::error::{Result, TollgateError};
use crate::store::{KeyValueStore, MemoryStore};

/// A manual clock parked at a fixed, readable instant.
pub fn fixed_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ))
}

/// Wraps a [`MemoryStore`], yields to the scheduler before every call so
/// concurrent checks really interleave, and can be switched to fail.
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    calls: AtomicUsize,
    // 0 means no one-shot failure is armed.
    fail_at: AtomicUsize,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            fail_at: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fail every call until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only the `n`th call from now (1-based), then recover.
    pub fn fail_nth_call(&self, n: usize) {
        let base = self.calls.load(Ordering::SeqCst);
        self.fail_at.store(base + n.max(1), Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<()> {
        tokio::task::yield_now().await;
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let one_shot = self
            .fail_at
            .compare_exchange(call, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if one_shot || self.failing.load(Ordering::SeqCst) {
            return Err(TollgateError::Store("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.gate().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.gate().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        self.gate().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_many(pairs).await
    }

    async fn decr_by(&self, key: &str, amount: u64) -> Result<i64> {
        self.gate().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.decr_by(key, amount).await
    }
}
