use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

fn map<K>(locks: &LockMap<K>) -> MutexGuard<'_, HashMap<K, Arc<AsyncMutex<()>>>> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lazily created async mutex per key.
///
/// Repeated lookups of the same key return the same mutex, so holders of a
/// key are serialized while distinct keys proceed independently. A key's
/// mutex is removed again once its last holder releases it with nobody
/// waiting.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Arc<LockMap<K>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut locks = map(&self.locks);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn guard(&self, key: &K, inner: OwnedMutexGuard<()>) -> KeyGuard<K> {
        KeyGuard {
            key: key.clone(),
            locks: Arc::clone(&self.locks),
            inner: Some(inner),
        }
    }

    /// Wait until `key` is free and take it.
    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        let inner = self.handle(key).lock_owned().await;
        self.guard(key, inner)
    }

    /// Take `key` only if nobody holds it.
    pub fn try_lock(&self, key: &K) -> Option<KeyGuard<K>> {
        let inner = self.handle(key).try_lock_owned().ok()?;
        Some(self.guard(key, inner))
    }

    /// Take several keys. Keys are sorted and deduplicated first so that
    /// callers locking overlapping sets cannot deadlock.
    pub async fn lock_all(&self, keys: &[K]) -> Vec<KeyGuard<K>>
    where
        K: Ord,
    {
        let mut sorted: Vec<&K> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Drop mutexes nobody holds or waits on.
    ///
    /// Sweeps entries left behind by waiters that gave up before acquiring.
    pub fn prune_idle(&self) {
        map(&self.locks).retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        map(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        map(&self.locks).is_empty()
    }
}

/// Guard for one key. The key is unlocked when the guard drops, and its
/// mutex is forgotten if no other task holds a reference to it.
#[derive(Debug)]
pub struct KeyGuard<K: Eq + Hash> {
    key: K,
    locks: Arc<LockMap<K>>,
    inner: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        // Release first: the owned guard holds one reference to the mutex.
        drop(self.inner.take());
        let mut locks = map(&self.locks);
        // Waiters clone the mutex under the map lock, so a count of one
        // means the map holds the only reference.
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}
