use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

type LockTable = DashMap<Ulid, Arc<Mutex<()>>>;

/// Async mutexes looked up by entity id. Entries live only while held or awaited.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    table: Arc<LockTable>,
}

/// Holds one keyed lock. Dropping it releases the lock and prunes the entry when idle.
pub struct KeyGuard {
    key: Ulid,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: Ulid) -> KeyGuard {
        let mutex = self.table.entry(key).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key,
            guard: Some(guard),
            table: self.table.clone(),
        }
    }

    /// Lock every key, deduplicated and in ascending order so that two callers
    /// locking overlapping sets cannot deadlock.
    pub async fn lock_all(&self, keys: impl IntoIterator<Item = Ulid>) -> Vec<KeyGuard> {
        let mut keys: Vec<Ulid> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of live entries. Idle keys are pruned on release.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own Arc left: nobody holds or waits on this key.
        self.table
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let key = Ulid::new();
        let held = locks.lock(key).await;

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.lock(key).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(Ulid::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(Ulid::new())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn entries_pruned_after_release() {
        let locks = KeyedLocks::new();
        {
            let _g = locks.lock_all([Ulid::new(), Ulid::new()]).await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn lock_all_dedups() {
        let locks = KeyedLocks::new();
        let key = Ulid::new();
        // would self-deadlock without dedup
        let guards = tokio::time::timeout(Duration::from_secs(1), locks.lock_all([key, key]))
            .await
            .unwrap();
        assert_eq!(guards.len(), 1);
    }
}
