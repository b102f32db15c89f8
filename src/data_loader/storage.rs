use std::borrow::Cow;
use std::collections::HashMap;
use std::hash::Hash;

/// Per-request result storage for [DataLoader](super::DataLoader).
///
/// Callers never lock this themselves; the loader guards it together with
/// its pending-batch state.
pub trait CacheStorage: Send + Sync + 'static {
    /// The key type of the record.
    type Key: Send + Sync + Clone + Eq + Hash + 'static;

    /// The value type of the record.
    type Value: Send + Sync + Clone + 'static;

    /// Returns a reference to the value of the key in the cache or None if
    /// it is not present in the cache.
    fn get(&mut self, key: &Self::Key) -> Option<&Self::Value>;

    /// Puts a key-value pair into the cache. If the key already exists in
    /// the cache, then it updates the key's value.
    fn insert(&mut self, key: Cow<'_, Self::Key>, val: Cow<'_, Self::Value>);
}

/// Factory for creating cache storage.
pub trait CacheFactory<K, V>: Send + Sync + 'static
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
{
    type Storage: CacheStorage<Key = K, Value = V>;

    /// Create a cache storage.
    fn create(&self) -> Self::Storage;
}

/// [std::collections::HashMap] cache.
#[derive(Default)]
pub struct HashMapCache;

impl<K, V> CacheFactory<K, V> for HashMapCache
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
{
    type Storage = HashMapCacheImpl<K, V>;

    fn create(&self) -> Self::Storage {
        HashMapCacheImpl(HashMap::new())
    }
}

pub struct HashMapCacheImpl<K, V>(HashMap<K, V>);

impl<K, V> CacheStorage for HashMapCacheImpl<K, V>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
{
    type Key = K;
    type Value = V;

    #[inline]
    fn get(&mut self, key: &Self::Key) -> Option<&Self::Value> {
        self.0.get(key)
    }

    #[inline]
    fn insert(&mut self, key: Cow<'_, Self::Key>, val: Cow<'_, Self::Value>) {
        self.0.insert(key.into_owned(), val.into_owned());
    }
}
