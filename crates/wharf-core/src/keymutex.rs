//! A map of per-key async mutexes.
//!
//! Locking installs a fresh mutex for the key when none exists. Unlocking
//! removes the mapping before the mutex is released, so the next locker
//! observes a fresh slot and waiters that queued on the removed instance
//! retry against whatever is installed now.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slot = Arc<Mutex<()>>;

/// Concurrent mapping from keys to mutexes.
pub struct KeyMutex<K: Eq + Hash> {
    slots: DashMap<K, Slot>,
}

impl<K: Eq + Hash> Default for KeyMutex<K> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash> fmt::Debug for KeyMutex<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMutex")
            .field("held", &self.slots.len())
            .finish()
    }
}

impl<K: Eq + Hash + Clone> KeyMutex<K> {
    /// Creates an empty key mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks `key`, waiting for any current holder to release it.
    pub async fn lock(&self, key: K) -> KeyMutexGuard<'_, K> {
        loop {
            let slot: Slot = self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let guard = Arc::clone(&slot).lock_owned().await;

            let installed = self
                .slots
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &slot));
            if installed {
                return KeyMutexGuard {
                    owner: self,
                    key: Some(key),
                    slot,
                    guard: Some(guard),
                };
            }
            // The previous holder unlocked and dropped this slot; retry on the fresh one.
            drop(guard);
        }
    }

    /// Number of keys currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true when no key is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn release(&self, key: &K, slot: &Slot) {
        let removed = self
            .slots
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot));
        assert!(removed.is_some(), "unlock of a key that is not locked");
    }
}

/// Holds a key locked until dropped or explicitly unlocked.
pub struct KeyMutexGuard<'a, K: Eq + Hash + Clone> {
    owner: &'a KeyMutex<K>,
    key: Option<K>,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> KeyMutexGuard<'_, K> {
    /// Releases the key.
    pub fn unlock(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(key) = self.key.take() {
            self.owner.release(&key, &self.slot);
            self.guard.take();
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyMutexGuard<'_, K> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> fmt::Debug for KeyMutexGuard<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMutexGuard").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_unlock_removes_mapping() {
        let km = KeyMutex::new();
        let guard = km.lock("artifact:1".to_string()).await;
        assert_eq!(km.len(), 1);
        guard.unlock();
        assert!(km.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let km = KeyMutex::new();
        let _a = km.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), km.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_mutually_exclusive() {
        let km = Arc::new(KeyMutex::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..64 {
            let km = Arc::clone(&km);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _guard = km.lock("shared").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(km.is_empty());
    }
}
