//! In-process store.
//!
//! Behaves like the remote store for a single process: string values,
//! optional expiry, atomic decrement. Used for tests and single-node runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use super::KeyValueStore;
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, TollgateError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// A [`KeyValueStore`] held in a concurrent map.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store that expires keys against the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that expires keys against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// All live keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|e| e.is_live(now))
            .map(|e| e.key().clone())
            .collect()
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl?).ok()?;
        self.clock.now().checked_add_signed(ttl)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        // Expired entries are dropped lazily on read.
        let removed = self.entries.remove_if(key, |_, e| !e.is_live(now));
        if removed.is_some() {
            trace!(key = %key, "Expired key dropped");
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: self.expiry(ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        // Map inserts cannot fail and nothing here yields, so no caller can
        // observe some pairs written and others not.
        for (key, value) in pairs {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: None,
                },
            );
        }
        Ok(())
    }

    async fn decr_by(&self, key: &str, amount: u64) -> Result<i64> {
        let now = self.clock.now();
        let amount = i64::try_from(amount)
            .map_err(|_| TollgateError::Store(format!("decrement {} out of range", amount)))?;

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        if !entry.is_live(now) {
            *entry = Entry {
                value: "0".to_string(),
                expires_at: None,
            };
        }

        let current: i64 = entry.value.parse().map_err(|_| {
            TollgateError::Store(format!("value at {:?} is not an integer", key))
        })?;
        let next = current
            .checked_sub(amount)
            .ok_or_else(|| TollgateError::Store(format!("decrement overflow at {:?}", key)))?;
        entry.value = next.to_string();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set("k", "42", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("42".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_set_overwrites_value_and_expiry() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::with_clock(clock.clone());

        store.set("k", "1", Some(Duration::from_secs(1))).await.unwrap();
        store.set("k", "2", None).await.unwrap();
        clock.advance(Duration::from_secs(5));

        assert_eq!(store.get("k").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_ttl_expires_key() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::with_clock(clock.clone());

        store.set("k", "v", Some(Duration::from_millis(500))).await.unwrap();
        clock.advance(Duration::from_millis(499));
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_many_writes_all_pairs_without_expiry() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::with_clock(clock.clone());
        store.set("a", "old", Some(Duration::from_secs(1))).await.unwrap();

        store.set_many(&[("a", "1"), ("b", "2")]).await.unwrap();
        clock.advance(Duration::from_secs(5));

        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.get("b").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_decr_by_existing() {
        let store = MemoryStore::new();
        store.set("k", "10", None).await.unwrap();
        assert_eq!(store.decr_by("k", 3).await.unwrap(), 7);
        assert_eq!(store.get("k").await.unwrap(), Some("7".to_string()));
    }

    #[tokio::test]
    async fn test_decr_by_missing_starts_at_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.decr_by("k", 2).await.unwrap(), -2);
    }

    #[tokio::test]
    async fn test_decr_by_keeps_expiry() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::with_clock(clock.clone());

        store.set("k", "5", Some(Duration::from_secs(1))).await.unwrap();
        store.decr_by("k", 1).await.unwrap();
        clock.advance(Duration::from_secs(1));

        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_decr_by_non_integer_fails() {
        let store = MemoryStore::new();
        store.set("k", "abc", None).await.unwrap();
        assert!(matches!(store.decr_by("k", 1).await, Err(TollgateError::Store(_))));
    }

    #[tokio::test]
    async fn test_clear_and_keys() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();
        store.set("b", "2", None).await.unwrap();

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        store.clear();
        assert!(store.is_empty());
    }
}
