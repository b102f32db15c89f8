use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use ttl_cache::TtlCache;

use super::entry::CacheEntry;

/// Persistence backend of the shared cache: plain keyed reads and
/// last-write-wins writes, no transactional guarantees.
#[async_trait::async_trait]
pub trait Store<K, V>: Send + Sync + 'static
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn read(&self, key: &K) -> anyhow::Result<Option<CacheEntry<V>>>;
    async fn write(&self, key: &K, entry: CacheEntry<V>) -> anyhow::Result<()>;
}

const STORE_CAPACITY: usize = 100000;

/// In-memory store. The TTL map drops entries at their hard expiry on
/// its own; the entry's own timestamps stay authoritative for staleness.
pub struct InMemoryStore<K: Hash + Eq, V> {
    data: Arc<RwLock<TtlCache<K, CacheEntry<V>>>>,
    hits: AtomicUsize,
    miss: AtomicUsize,
}

impl<K: Hash + Eq, V: Clone> Default for InMemoryStore<K, V> {
    fn default() -> Self {
        Self::new(STORE_CAPACITY)
    }
}

impl<K: Hash + Eq, V: Clone> InMemoryStore<K, V> {
    pub fn new(capacity: usize) -> Self {
        InMemoryStore {
            data: Arc::new(RwLock::new(TtlCache::new(capacity))),
            hits: AtomicUsize::new(0),
            miss: AtomicUsize::new(0),
        }
    }

    pub fn hit_rate(&self) -> Option<f64> {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.miss.load(Ordering::Relaxed);

        if hits + misses > 0 {
            return Some(hits as f64 / (hits + misses) as f64);
        }

        None
    }
}

#[async_trait::async_trait]
impl<K, V> Store<K, V> for InMemoryStore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn read(&self, key: &K) -> anyhow::Result<Option<CacheEntry<V>>> {
        let entry = self.data.read().unwrap().get(key).cloned();
        if entry.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.miss.fetch_add(1, Ordering::Relaxed);
        }
        Ok(entry)
    }

    async fn write(&self, key: &K, entry: CacheEntry<V>) -> anyhow::Result<()> {
        let ttl = entry.remaining_ttl();
        if ttl.is_zero() {
            return Ok(());
        }
        self.data.write().unwrap().insert(key.clone(), entry, ttl);
        Ok(())
    }
}
