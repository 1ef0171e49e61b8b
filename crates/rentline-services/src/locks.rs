//! Per-aggregate locking
//!
//! Read-modify-write sequences on one reservation, post or advertisement
//! window must not interleave. [`AggregateLocks`] hands out one async mutex
//! per key; different keys never contend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Registry size above which idle entries are dropped
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of per-key async mutexes
pub struct AggregateLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for AggregateLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> AggregateLocks<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    ///
    /// The guard releases the key when dropped.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > PRUNE_THRESHOLD {
                Self::prune(&mut locks);
            }
            locks.entry(key.clone()).or_default().clone()
        };

        debug!("Acquiring aggregate lock {:?}", key);
        lock.lock_owned().await
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Entries only referenced by the map have no holder and no waiter.
    fn prune(locks: &mut HashMap<K, Arc<AsyncMutex<()>>>) {
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
