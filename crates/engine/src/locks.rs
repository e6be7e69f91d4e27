//! In-process keyed mutexes.
//!
//! Ledger read-modify-write is serialized per `(user, method)` and mirror
//! reconciliation per grouping id. Locks are always taken *before* a database
//! transaction is opened and multi-key acquisitions are sorted, so two tasks
//! can never wait on each other.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 1024;

pub(crate) struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> std::fmt::Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLocks").finish_non_exhaustive()
    }
}

impl<K: Eq + Hash + Clone + Ord> KeyedLocks<K> {
    fn slot(&self, key: K) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if map.len() >= PRUNE_THRESHOLD {
            // Only the map holds an unused slot.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        Arc::clone(map.entry(key).or_default())
    }

    pub(crate) async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    /// Lock every key in a global order (sorted, deduplicated).
    pub(crate) async fn lock_all(&self, mut keys: Vec<K>) -> Vec<OwnedMutexGuard<()>> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }
}
