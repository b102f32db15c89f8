use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use indexmap::IndexSet;
use tokio::sync::broadcast;

use super::error::LoadError;

/// Trait for field-level loading.
///
/// One call fetches a subset of one entity's fields. The response must
/// contain at least the requested fields; extra fields are tolerated and
/// merged.
#[async_trait::async_trait]
pub trait FieldLoader<K: Send + Sync + Hash + Eq + Clone + 'static>:
    Send + Sync + 'static
{
    /// Type of one field's value.
    type Value: Send + Sync + Clone + 'static;

    /// Type of error. Shared by all waiters of a fetch, hence `Clone`.
    type Error: Send + Sync + Clone + 'static;

    /// Fetch the given `fields` of the entity identified by `id`.
    async fn fetch_fields(
        &self,
        id: &K,
        fields: &[String],
    ) -> Result<HashMap<String, Self::Value>, Self::Error>;
}

/// What one entity looks like to the loader: the field values it has
/// resolved so far, which fields have been asked of the upstream already
/// (resolved, queued, or in flight), and which fields settled as faults.
struct FieldRecord<V, E> {
    values: HashMap<String, V>,
    requested: HashSet<String>,
    faults: HashMap<String, LoadError<E>>,
    /// Fields queued for the next flush of this entity.
    queued: IndexSet<String>,
    changed: broadcast::Sender<()>,
}

impl<V, E> Default for FieldRecord<V, E> {
    fn default() -> Self {
        let (changed, _) = broadcast::channel(16);
        Self {
            values: HashMap::new(),
            requested: HashSet::new(),
            faults: HashMap::new(),
            queued: IndexSet::new(),
            changed,
        }
    }
}

impl<V: Clone, E: Clone> FieldRecord<V, E> {
    /// Some(..) once every requested field has settled, None while any is
    /// still queued or in flight.
    fn try_resolve(&self, fields: &[&str]) -> Option<Result<HashMap<String, V>, LoadError<E>>> {
        for field in fields {
            if let Some(fault) = self.faults.get(*field) {
                return Some(Err(fault.clone()));
            }
        }
        if fields.iter().all(|field| self.values.contains_key(*field)) {
            let values = fields
                .iter()
                .map(|field| ((*field).to_string(), self.values[*field].clone()))
                .collect();
            Some(Ok(values))
        } else {
            None
        }
    }
}

/// Batching loader whose unit of work is an (entity, field-subset) pair.
///
/// Repeated lookups of the same entity only ever fetch fields that have
/// not been seen before in this request; concurrent lookups inside one
/// batch window merge their missing fields into a single upstream call
/// per entity.
pub struct FieldDataLoader<K, T>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: FieldLoader<K>,
{
    inner: Arc<FieldDataLoaderInner<K, T>>,
    delay: Duration,
    spawner: Box<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>,
}

struct FieldDataLoaderInner<K, T>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: FieldLoader<K>,
{
    loader: T,
    records: Mutex<HashMap<K, FieldRecord<T::Value, T::Error>>>,
}

impl<K, T> FieldDataLoaderInner<K, T>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: FieldLoader<K>,
{
    async fn flush(&self, id: &K) {
        let batch: Vec<String> = {
            let mut records = self.records.lock().unwrap();
            match records.get_mut(id) {
                Some(record) => record.queued.drain(..).collect(),
                None => return,
            }
        };
        if batch.is_empty() {
            return;
        }

        let fetched = self.loader.fetch_fields(id, &batch).await;

        let mut records = self.records.lock().unwrap();
        let record = match records.get_mut(id) {
            Some(record) => record,
            None => return,
        };
        match fetched {
            Ok(mut values) => {
                for field in &batch {
                    match values.remove(field) {
                        Some(value) => {
                            record.values.insert(field.clone(), value);
                        }
                        None => {
                            record
                                .faults
                                .insert(field.clone(), LoadError::MissingField(field.clone()));
                        }
                    }
                }
                // Keep whatever extra fields the upstream volunteered.
                for (field, value) in values {
                    record.requested.insert(field.clone());
                    record.values.insert(field, value);
                }
            }
            Err(err) => {
                for field in batch {
                    record.faults.insert(field, LoadError::Batch(err.clone()));
                }
            }
        }
        let _ = record.changed.send(());
    }
}

impl<K, T> FieldDataLoader<K, T>
where
    K: Send + Sync + Eq + Clone + Hash + 'static,
    T: FieldLoader<K>,
{
    /// Use `FieldLoader` to create a [FieldDataLoader].
    pub fn new<S, R>(loader: T, spawner: S) -> Self
    where
        S: Fn(BoxFuture<'static, ()>) -> R + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(FieldDataLoaderInner { loader, records: Mutex::new(HashMap::new()) }),
            delay: Duration::from_millis(1),
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

    /// Get the loader.
    #[inline]
    pub fn loader(&self) -> &T {
        &self.inner.loader
    }

    /// Resolve `fields` of the entity `id`, fetching only the ones this
    /// request has not asked for before. The result maps exactly the
    /// requested fields to their values.
    pub async fn load_fields(
        &self,
        id: &K,
        fields: &[&str],
    ) -> Result<HashMap<String, T::Value>, LoadError<T::Error>> {
        let mut rx = {
            let mut records = self.inner.records.lock().unwrap();
            let record = records.entry(id.clone()).or_default();

            let missing: Vec<String> = fields
                .iter()
                .filter(|field| !record.requested.contains(**field))
                .map(|field| (*field).to_string())
                .collect();
            if !missing.is_empty() {
                let start_window = record.queued.is_empty();
                for field in missing {
                    record.requested.insert(field.clone());
                    record.queued.insert(field);
                }
                if start_window {
                    let inner = self.inner.clone();
                    let id = id.clone();
                    let delay = self.delay;
                    (self.spawner)(Box::pin(async move {
                        tokio::time::sleep(delay).await;
                        inner.flush(&id).await;
                    }));
                }
            }

            if let Some(result) = record.try_resolve(fields) {
                return result;
            }
            record.changed.subscribe()
        };

        loop {
            // A lagged receiver only means we missed intermediate signals;
            // the state check below is what decides.
            let _ = rx.recv().await;
            let mut records = self.inner.records.lock().unwrap();
            let record = records.entry(id.clone()).or_default();
            if let Some(result) = record.try_resolve(fields) {
                return result;
            }
        }
    }
}
