//! Per-key async lock table.
//!
//! Serializes state transitions for a single model or job without a global
//! lock. Entries are created on demand and dropped when the last holder or
//! waiter releases them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of async mutexes keyed by id.
pub struct LockTable<K: Eq + Hash + Clone> {
    entries: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

impl<K: Eq + Hash + Clone> LockTable<K> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire the lock for `key`, waiting for any current holder.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let slot = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            key,
            entries: Arc::clone(&self.entries),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for LockTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the lock for one key until dropped.
pub struct KeyGuard<K: Eq + Hash + Clone> {
    key: K,
    entries: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        let mut entries = self.entries.lock();
        // One reference from the table and one from our guard: nobody is waiting.
        let idle = entries
            .get(&self.key)
            .map_or(false, |slot| Arc::strong_count(slot) <= 2);
        if idle {
            entries.remove(&self.key);
        }
        self.guard.take();
    }
}
