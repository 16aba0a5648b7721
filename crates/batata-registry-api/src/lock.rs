//! Per-key async critical sections
//!
//! Backends hold a key's lock while they change both the consumer table and
//! the backend watch for that key, so the decision to release a watch at
//! zero consumers cannot interleave with a new subscription.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of async mutexes, one per key. Idle slots are dropped.
#[derive(Default)]
pub struct KeyLocks {
    /// key = canonical service key
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        loop {
            let slot = self.slots.entry(key.to_string()).or_default().clone();
            let guard = slot.clone().lock_owned().await;
            // The slot may have been dropped from the table while waiting
            let current = self
                .slots
                .get(key)
                .is_some_and(|s| Arc::ptr_eq(s.value(), &slot));
            if current {
                return KeyGuard {
                    locks: self,
                    key: key.to_string(),
                    slot,
                    guard: Some(guard),
                };
            }
        }
    }

    /// Number of keys with a live slot.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Exclusive access to one key until dropped.
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    slot: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the table and this guard hold the slot when nobody waits
        self.locks.slots.remove_if(&self.key, |_, slot| {
            Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_slot_dropped_when_idle() {
        let locks = KeyLocks::new();
        {
            let _guard = locks.lock("k").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _first = locks.lock("a").await;
        let _second = locks.lock("b").await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let overlaps = overlaps.clone();
                tokio::spawn(async move {
                    for _ in 0..20 {
                        let _guard = locks.lock("k").await;
                        if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_micros(50)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(locks.is_empty());
    }
}
