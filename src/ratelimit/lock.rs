//! Per-instance serialization of same-key checks.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

/// A fixed set of async mutexes, one picked per key by hash.
///
/// Two checks on the same key always contend for the same stripe, so the
/// store read-modify-write sequence cannot interleave within one process.
/// Different keys share a stripe only on hash collision. This offers no
/// protection against other processes writing the same key.
#[derive(Debug)]
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    /// Create `stripes` locks. At least one is always created.
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(key)].lock().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_zero_stripes_clamped() {
        assert_eq!(KeyLocks::new(0).len(), 1);
    }

    #[test]
    fn test_same_key_same_stripe() {
        let locks = KeyLocks::new(16);
        assert_eq!(locks.stripe_of("client"), locks.stripe_of("client"));
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new(8));
        let guard = locks.lock("k").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("k").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }
}
