//! Bounded async cache: capacity, expiry and single-flight initialisation.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

type Slot<V, E> = Arc<OnceCell<Result<V, Arc<E>>>>;

struct Entry<V, E> {
    cell: Slot<V, E>,
    inserted: Instant,
    last_used: Instant,
}

/// Values are computed at most once per key and expiry window; concurrent callers for a
/// missing key share the same computation, including its failure. The map lock is never
/// held across `.await`.
pub struct BoundedCache<K, V, E> {
    entries: Mutex<HashMap<K, Entry<V, E>>>,
    capacity: usize,
    ttl: Duration,
    stats: CacheStats,
}

impl<K, V, E> BoundedCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
            stats: CacheStats::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V, E>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached value for `key`, or the result of `init`. A failure is handed to every caller
    /// already waiting on that computation, then dropped so the next caller retries.
    pub async fn get_or_try_init<F, Fut>(&self, key: K, init: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut entries = self.lock();
            let now = Instant::now();
            match entries.get_mut(&key) {
                Some(entry) if now.duration_since(entry.inserted) < self.ttl => {
                    entry.last_used = now;
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    entry.cell.clone()
                }
                _ => {
                    entries.remove(&key);
                    if entries.len() >= self.capacity {
                        self.evict(&mut entries, now);
                    }
                    let cell = Arc::new(OnceCell::new());
                    entries.insert(
                        key.clone(),
                        Entry {
                            cell: cell.clone(),
                            inserted: now,
                            last_used: now,
                        },
                    );
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    cell
                }
            }
        };

        let outcome = cell
            .get_or_init(|| async move { init().await.map_err(Arc::new) })
            .await
            .clone();
        if outcome.is_err() {
            let mut entries = self.lock();
            if entries.get(&key).is_some_and(|entry| Arc::ptr_eq(&entry.cell, &cell)) {
                entries.remove(&key);
            }
        }
        outcome
    }

    /// Drop expired entries; if still full, drop the least recently used one.
    fn evict(&self, entries: &mut HashMap<K, Entry<V, E>>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.inserted) < self.ttl);
        let mut evicted = before - entries.len();
        if entries.len() >= self.capacity {
            let lru = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(key) = lru {
                entries.remove(&key);
                evicted += 1;
            }
        }
        self.stats.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub fn invalidate(&self, key: &K) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
