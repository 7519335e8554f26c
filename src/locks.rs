//! Async mutexes keyed by id, created on demand.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of lazily created async mutexes.
///
/// Entries nobody holds are pruned on the next `lock` call.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for the lock on `key`. Released when the guard drops.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            locks.retain(|k, slot| *k == key || Arc::strong_count(slot) > 1);
            Arc::clone(locks.entry(key).or_default())
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    /// Try to take the lock on `key` without waiting.
    async fn try_lock(&self, key: K) -> Option<OwnedMutexGuard<()>> {
        let slot = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key).or_default())
        };
        slot.try_lock_owned().ok()
    }

    #[cfg(test)]
    /// Number of tracked keys (held or not yet pruned).
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
