use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use indexmap::IndexSet;
use tokio::sync::{broadcast, oneshot};

use super::error::LoadError;
use super::loader::Loader;
use super::storage::{CacheFactory, CacheStorage, HashMapCache};

type KeyedResults<K, T> =
    HashMap<K, Result<<T as Loader<K>>::Value, LoadError<<T as Loader<K>>::Error>>>;
type ResSender<K, T> = oneshot::Sender<KeyedResults<K, T>>;
type KeysAndSenders<K, T> = (IndexSet<K>, Vec<(IndexSet<K>, ResSender<K, T>)>);
type InFlightSender<K, T> =
    broadcast::Sender<Result<<T as Loader<K>>::Value, LoadError<<T as Loader<K>>::Error>>>;

/// Batching data loader, scoped to one request.
///
/// Concurrent lookups issued inside one batch window collapse into a
/// single upstream call with an ordered, de-duplicated key list. Settled
/// results (successes and faults alike) stay cached until the loader is
/// dropped with its request, so each distinct key reaches the upstream at
/// most once per request lifetime.
///
/// Reference: <https://github.com/facebook/dataloader>
pub struct DataLoader<K, T, C = HashMapCache>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: Loader<K>,
    C: CacheFactory<K, Result<T::Value, LoadError<T::Error>>>,
{
    inner: Arc<DataLoaderInner<K, T, C>>,
    delay: Duration,
    max_batch_size: usize,
    spawner: Box<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>,
}

struct DataLoaderInner<K, T, C>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: Loader<K>,
    C: CacheFactory<K, Result<T::Value, LoadError<T::Error>>>,
{
    requests: Mutex<Requests<K, T, C>>,
    loader: T,
}

struct Requests<K, T, C>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: Loader<K>,
    C: CacheFactory<K, Result<T::Value, LoadError<T::Error>>>,
{
    /// Keys collected during the current batch window, in first-seen order.
    keys: IndexSet<K>,
    /// One slot per waiting caller, annotated with the keys it registered.
    pending: Vec<(IndexSet<K>, ResSender<K, T>)>,
    /// Keys whose batch has been dispatched but has not settled yet; late
    /// callers attach here instead of issuing a second fetch.
    in_flight: HashMap<K, InFlightSender<K, T>>,
    cache_storage: C::Storage,
}

impl<K, T, C> Requests<K, T, C>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: Loader<K>,
    C: CacheFactory<K, Result<T::Value, LoadError<T::Error>>>,
{
    fn new(cache_factory: &C) -> Self {
        Self {
            keys: IndexSet::new(),
            pending: Vec::new(),
            in_flight: HashMap::new(),
            cache_storage: cache_factory.create(),
        }
    }

    /// Closes the current batch window: the drained keys are marked
    /// in-flight until [`DataLoaderInner::do_load`] settles them.
    fn take(&mut self) -> KeysAndSenders<K, T> {
        let keys = mem::take(&mut self.keys);
        for key in &keys {
            let (tx, _) = broadcast::channel(1);
            self.in_flight.insert(key.clone(), tx);
        }
        (keys, mem::take(&mut self.pending))
    }
}

impl<K, T, C> DataLoaderInner<K, T, C>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: Loader<K>,
    C: CacheFactory<K, Result<T::Value, LoadError<T::Error>>>,
{
    async fn do_load(&self, (keys, senders): KeysAndSenders<K, T>) {
        let keys: Vec<K> = keys.into_iter().collect();

        let results: KeyedResults<K, T> = match self.loader.load(&keys).await {
            Ok(values) if values.len() == keys.len() => keys
                .iter()
                .cloned()
                .zip(values.into_iter().map(|value| value.map_err(LoadError::Key)))
                .collect(),
            Ok(values) => {
                let fault = LoadError::Mismatch { expected: keys.len(), actual: values.len() };
                keys.iter().cloned().map(|key| (key, Err(fault.clone()))).collect()
            }
            Err(err) => keys
                .iter()
                .cloned()
                .map(|key| (key, Err(LoadError::Batch(err.clone()))))
                .collect(),
        };

        let mut requests = self.requests.lock().unwrap();
        for (key, result) in &results {
            requests
                .cache_storage
                .insert(Cow::Borrowed(key), Cow::Borrowed(result));
            if let Some(tx) = requests.in_flight.remove(key) {
                let _ = tx.send(result.clone());
            }
        }
        drop(requests);

        for (keys, sender) in senders {
            let res = keys
                .iter()
                .map(|key| (key.clone(), results[key].clone()))
                .collect();
            let _ = sender.send(res);
        }
    }
}

impl<K, T> DataLoader<K, T, HashMapCache>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: Loader<K>,
{
    /// Use `Loader` to create a [DataLoader] backed by hash-map storage.
    pub fn new<S, R>(loader: T, spawner: S) -> Self
    where
        S: Fn(BoxFuture<'static, ()>) -> R + Send + Sync + 'static,
    {
        Self::with_cache(loader, spawner, HashMapCache)
    }
}

impl<K, T, C> DataLoader<K, T, C>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: Loader<K>,
    C: CacheFactory<K, Result<T::Value, LoadError<T::Error>>>,
{
    /// Use `Loader` to create a [DataLoader] with a cache factory.
    pub fn with_cache<S, R>(loader: T, spawner: S, cache_factory: C) -> Self
    where
        S: Fn(BoxFuture<'static, ()>) -> R + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(DataLoaderInner {
                requests: Mutex::new(Requests::new(&cache_factory)),
                loader,
            }),
            delay: Duration::from_millis(1),
            max_batch_size: 1000,
            spawner: Box::new(move |fut| {
                spawner(fut);
            }),
        }
    }

    /// Specify the delay time for loading data, the default is `1ms`.
    #[must_use]
    pub fn delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    /// Specify the max batch size for loading data, the default is `1000`.
    ///
    /// If the keys waiting to be loaded reach the threshold, they are
    /// loaded immediately.
    #[must_use]
    pub fn max_batch_size(self, max_batch_size: usize) -> Self {
        Self { max_batch_size, ..self }
    }

    /// Get the loader.
    #[inline]
    pub fn loader(&self) -> &T {
        &self.inner.loader
    }

    /// Use this `DataLoader` to load one key.
    pub async fn load_one(&self, key: K) -> Result<T::Value, LoadError<T::Error>> {
        let mut results = self.load_many(std::iter::once(key)).await;
        results.pop().expect("one key yields one result")
    }

    /// Use this `DataLoader` to load a list of keys. Results align with
    /// the input order; duplicate keys each receive the shared result.
    pub async fn load_many<I>(&self, keys: I) -> Vec<Result<T::Value, LoadError<T::Error>>>
    where
        I: IntoIterator<Item = K>,
    {
        enum Action<K, T>
        where
            K: Send + Sync + Eq + Clone + Hash + 'static,
            T: Loader<K>,
        {
            ImmediateLoad(KeysAndSenders<K, T>),
            StartFetch,
            Delay,
        }

        let keys: Vec<K> = keys.into_iter().collect();
        if keys.is_empty() {
            return Vec::new();
        }

        let (action, window_rx, joins, mut resolved) = {
            let mut requests = self.inner.requests.lock().unwrap();
            let prev_count = requests.keys.len();

            let mut resolved: KeyedResults<K, T> = HashMap::new();
            let mut joins = Vec::new();
            let mut missing: IndexSet<K> = IndexSet::new();
            let mut seen: HashSet<&K> = HashSet::new();
            for key in &keys {
                if !seen.insert(key) {
                    continue;
                }
                if let Some(result) = requests.cache_storage.get(key) {
                    resolved.insert(key.clone(), result.clone());
                } else if let Some(tx) = requests.in_flight.get(key) {
                    joins.push((key.clone(), tx.subscribe()));
                } else {
                    missing.insert(key.clone());
                }
            }

            if missing.is_empty() {
                (Action::<K, T>::Delay, None, joins, resolved)
            } else {
                requests.keys.extend(missing.iter().cloned());
                let (tx, rx) = oneshot::channel();
                requests.pending.push((missing, tx));

                let action = if requests.keys.len() >= self.max_batch_size {
                    Action::ImmediateLoad(requests.take())
                } else if prev_count == 0 {
                    Action::StartFetch
                } else {
                    Action::Delay
                };
                (action, Some(rx), joins, resolved)
            }
        };

        match action {
            Action::ImmediateLoad(batch) => {
                let inner = self.inner.clone();
                (self.spawner)(Box::pin(async move { inner.do_load(batch).await }));
            }
            Action::StartFetch => {
                let inner = self.inner.clone();
                let delay = self.delay;
                (self.spawner)(Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    let batch = {
                        let mut requests = inner.requests.lock().unwrap();
                        requests.take()
                    };
                    if !batch.0.is_empty() {
                        inner.do_load(batch).await
                    }
                }));
            }
            Action::Delay => {}
        }

        if let Some(rx) = window_rx {
            let fetched = rx.await.expect("batch flush task settles every sender");
            resolved.extend(fetched);
        }
        for (key, mut rx) in joins {
            let result = rx.recv().await.expect("in-flight batch settles every key");
            resolved.insert(key, result);
        }

        keys.iter()
            .map(|key| resolved[key].clone())
            .collect()
    }

    /// Seed the per-request cache with a known value, so a later load of
    /// `key` is answered without a fetch. Keys already resolved, pending,
    /// or in flight are left untouched.
    pub fn prime(&self, key: K, value: T::Value) {
        let mut requests = self.inner.requests.lock().unwrap();
        if requests.cache_storage.get(&key).is_none()
            && !requests.keys.contains(&key)
            && !requests.in_flight.contains_key(&key)
        {
            requests
                .cache_storage
                .insert(Cow::Owned(key), Cow::Owned(Ok(value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::future::join_all;
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Clone, Default)]
    struct MockLoader {
        calls: Arc<AtomicUsize>,
        batches: Arc<Mutex<Vec<Vec<String>>>>,
    }

    #[async_trait::async_trait]
    impl Loader<String> for MockLoader {
        type Value = Option<String>;
        type Error = String;

        async fn load(
            &self,
            keys: &[String],
        ) -> Result<Vec<Result<Self::Value, String>>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(keys.to_vec());
            Ok(keys
                .iter()
                .map(|key| {
                    if key.starts_with("bad") {
                        Err(format!("boom_{}", key))
                    } else if key.starts_with("missing") {
                        Ok(None)
                    } else {
                        Ok(Some(format!("value_{}", key)))
                    }
                })
                .collect())
        }
    }

    fn data_loader(mock: MockLoader) -> DataLoader<String, MockLoader> {
        DataLoader::new(mock, tokio::spawn).delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_dedup_within_tick() {
        let mock = MockLoader::default();
        let loader = data_loader(mock.clone());

        let futures: Vec<_> = (0..100).map(|_| loader.load_one("a".to_string())).collect();
        let results = join_all(futures).await;

        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result, Ok(Some("value_a".to_string())));
        }
    }

    #[tokio::test]
    async fn test_batch_coalescing_preserves_order() {
        let mock = MockLoader::default();
        let loader = data_loader(mock.clone());

        let (a, b) = tokio::join!(
            loader.load_one("a".to_string()),
            loader.load_one("b".to_string())
        );

        assert_eq!(a, Ok(Some("value_a".to_string())));
        assert_eq!(b, Ok(Some("value_b".to_string())));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *mock.batches.lock().unwrap(),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_per_key_fault_is_isolated() {
        let mock = MockLoader::default();
        let loader = data_loader(mock.clone());

        let results = loader
            .load_many(vec!["a".to_string(), "bad".to_string(), "b".to_string()])
            .await;

        assert_eq!(results[0], Ok(Some("value_a".to_string())));
        assert_eq!(results[1], Err(LoadError::Key("boom_bad".to_string())));
        assert_eq!(results[2], Ok(Some("value_b".to_string())));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_results_cached_for_request_lifetime() {
        let mock = MockLoader::default();
        let loader = data_loader(mock.clone());

        let first = loader.load_one("a".to_string()).await;
        let second = loader.load_one("a".to_string()).await;

        assert_eq!(first, second);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_negative_result_cached() {
        let mock = MockLoader::default();
        let loader = data_loader(mock.clone());

        assert_eq!(loader.load_one("missing".to_string()).await, Ok(None));
        assert_eq!(loader.load_one("missing".to_string()).await, Ok(None));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fault_cached() {
        let mock = MockLoader::default();
        let loader = data_loader(mock.clone());

        let first = loader.load_one("bad".to_string()).await;
        let second = loader.load_one("bad".to_string()).await;

        assert_eq!(first, Err(LoadError::Key("boom_bad".to_string())));
        assert_eq!(first, second);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prime_skips_fetch() {
        let mock = MockLoader::default();
        let loader = data_loader(mock.clone());

        loader.prime("a".to_string(), Some("primed".to_string()));
        let result = loader.load_one("a".to_string()).await;

        assert_eq!(result, Ok(Some("primed".to_string())));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_load_many_aligns_with_duplicates() {
        let mock = MockLoader::default();
        let loader = data_loader(mock.clone());

        let results = loader
            .load_many(vec!["a".to_string(), "b".to_string(), "a".to_string()])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], results[2]);
        assert_eq!(results[1], Ok(Some("value_b".to_string())));
        assert_eq!(
            *mock.batches.lock().unwrap(),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
    }

    struct FailingLoader {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Loader<String> for FailingLoader {
        type Value = Option<String>;
        type Error = String;

        async fn load(
            &self,
            _keys: &[String],
        ) -> Result<Vec<Result<Self::Value, String>>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("connection reset".to_string())
        }
    }

    #[tokio::test]
    async fn test_wholesale_failure_faults_every_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = DataLoader::new(FailingLoader { calls: calls.clone() }, tokio::spawn)
            .delay(Duration::from_millis(1));

        let results = loader
            .load_many(vec!["a".to_string(), "b".to_string()])
            .await;

        for result in results {
            assert_eq!(result, Err(LoadError::Batch("connection reset".to_string())));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct ShortLoader;

    #[async_trait::async_trait]
    impl Loader<String> for ShortLoader {
        type Value = Option<String>;
        type Error = String;

        async fn load(
            &self,
            _keys: &[String],
        ) -> Result<Vec<Result<Self::Value, String>>, String> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_result_length_mismatch_faults_batch() {
        let loader = DataLoader::new(ShortLoader, tokio::spawn).delay(Duration::from_millis(1));

        let result = loader.load_one("a".to_string()).await;

        assert_eq!(result, Err(LoadError::Mismatch { expected: 1, actual: 0 }));
    }

    #[tokio::test]
    async fn test_max_batch_size_flushes_immediately() {
        let mock = MockLoader::default();
        // A delay this long would fail the test timeout if the size
        // threshold did not flush the batch on its own.
        let loader = DataLoader::new(mock.clone(), tokio::spawn)
            .delay(Duration::from_secs(5))
            .max_batch_size(2);

        let results = tokio::time::timeout(Duration::from_secs(1), async {
            tokio::join!(
                loader.load_one("a".to_string()),
                loader.load_one("b".to_string())
            )
        })
        .await
        .expect("batch must flush once max_batch_size is reached");

        assert_eq!(results.0, Ok(Some("value_a".to_string())));
        assert_eq!(results.1, Ok(Some("value_b".to_string())));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Clone, Default)]
    struct SlowLoader {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Loader<String> for SlowLoader {
        type Value = Option<String>;
        type Error = String;

        async fn load(
            &self,
            keys: &[String],
        ) -> Result<Vec<Result<Self::Value, String>>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(keys
                .iter()
                .map(|key| Ok(Some(format!("value_{}", key))))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_late_caller_joins_in_flight_batch() {
        let mock = SlowLoader::default();
        let loader = Arc::new(
            DataLoader::new(mock.clone(), tokio::spawn).delay(Duration::from_millis(1)),
        );

        let early = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load_one("a".to_string()).await })
        };
        // Let the batch window close and the fetch start.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let late = loader.load_one("a".to_string()).await;

        assert_eq!(early.await.unwrap(), late);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    }
}
