use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use derive_setters::Setters;
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

use super::entry::{CacheEntry, Freshness};
use super::error::Error;
use super::store::Store;

/// Freshness policy of one shared cache.
#[derive(Clone, Debug, Setters)]
pub struct CacheOptions {
    /// Hard lifetime; past this an entry is treated as absent.
    pub ttl: Duration,
    /// Preferred freshness window; past this an entry still serves while
    /// a background refresh runs.
    pub stale_in: Duration,
    /// How long a caller with no usable value waits for a generation
    /// before giving up. Kept short so the caller can degrade gracefully
    /// instead of hanging; the generation itself is never cut off.
    pub generate_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            stale_in: Duration::from_secs(60),
            generate_timeout: Duration::from_secs(2),
        }
    }
}

/// Process-wide stale-while-revalidate cache.
///
/// Shields a rate-limited upstream from bursts: fresh entries serve with
/// no upstream call, stale entries serve immediately while exactly one
/// detached refresh runs, and misses collapse onto a single in-flight
/// generation per key no matter how many callers arrive.
pub struct SharedCache<K, V>
where
    K: Debug + Send + Sync + Eq + Clone + Hash + 'static,
    V: Send + Sync + Clone + 'static,
{
    store: Arc<dyn Store<K, V>>,
    options: CacheOptions,
    in_flight: Arc<Mutex<HashMap<K, broadcast::Sender<Result<V, Error>>>>>,
}

impl<K, V> SharedCache<K, V>
where
    K: Debug + Send + Sync + Eq + Clone + Hash + 'static,
    V: Send + Sync + Clone + 'static,
{
    pub fn new(store: Arc<dyn Store<K, V>>, options: CacheOptions) -> Self {
        Self { store, options, in_flight: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Resolve `key`, calling `generate` only when no usable entry exists
    /// and no generation for the key is already in flight.
    pub async fn get(
        &self,
        key: K,
        generate: impl FnOnce() -> BoxFuture<'static, anyhow::Result<V>> + Send,
    ) -> Result<V, Error> {
        let entry = self
            .store
            .read(&key)
            .await
            .map_err(|err| Error::Store(Arc::new(err)))?;

        match entry.map(|entry| (entry.freshness(), entry)) {
            Some((Freshness::Fresh, entry)) => {
                tracing::debug!(?key, "cache hit");
                Ok(entry.value)
            }
            Some((Freshness::Stale, entry)) => {
                tracing::debug!(?key, "cache hit (stale), refreshing");
                // The caller is never blocked on the refresh; drop the
                // receiver and serve what we have.
                let _ = self.attach_generation(&key, generate);
                Ok(entry.value)
            }
            _ => {
                tracing::debug!(?key, "cache miss");
                let mut rx = self.attach_generation(&key, generate);
                match tokio::time::timeout(self.options.generate_timeout, rx.recv()).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(Error::Generation(Arc::new(anyhow::anyhow!(
                        "generation settled without a result"
                    )))),
                    Err(_) => Err(Error::GenerationTimeout(self.options.generate_timeout)),
                }
            }
        }
    }

    /// Subscribe to the in-flight generation for `key`, starting one if
    /// none exists. The generation task runs detached: a caller that
    /// stops waiting does not cancel it, and its result lands in the
    /// store either way.
    fn attach_generation(
        &self,
        key: &K,
        generate: impl FnOnce() -> BoxFuture<'static, anyhow::Result<V>> + Send,
    ) -> broadcast::Receiver<Result<V, Error>> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(tx) = in_flight.get(key) {
            return tx.subscribe();
        }

        let (tx, rx) = broadcast::channel(1);
        in_flight.insert(key.clone(), tx.clone());

        let fut = generate();
        let store = self.store.clone();
        let options = self.options.clone();
        let in_flight_map = self.in_flight.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let result = match fut.await {
                Ok(value) => {
                    let entry =
                        CacheEntry::new(value.clone(), options.stale_in, options.ttl);
                    if let Err(err) = store.write(&key, entry).await {
                        tracing::warn!(?key, error = %err, "failed to write generated entry");
                    }
                    Ok(value)
                }
                Err(err) => {
                    tracing::warn!(?key, error = %err, "generation failed");
                    Err(Error::Generation(Arc::new(err)))
                }
            };
            // Clear the slot before broadcasting so a caller that races in
            // now either sees the stored entry or starts a new generation.
            in_flight_map.lock().unwrap().remove(&key);
            let _ = tx.send(result);
        });

        rx
    }
}
