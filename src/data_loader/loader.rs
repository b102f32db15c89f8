use std::hash::Hash;

/// Trait for batch loading.
///
/// One call resolves a whole batch of keys against an upstream. The
/// returned list must align with `keys` one-to-one: each position holds
/// either the value for that key or the fault that hit that key alone.
/// The outer error is a wholesale failure (the upstream call itself died
/// before any per-key outcome was known) and is shared by every key in
/// the batch.
#[async_trait::async_trait]
pub trait Loader<K: Send + Sync + Hash + Eq + Clone + 'static>: Send + Sync + 'static {
    /// Type of value.
    type Value: Send + Sync + Clone + 'static;

    /// Type of error. Shared by all waiters of a batch, hence `Clone`.
    type Error: Send + Sync + Clone + 'static;

    /// Load the data set specified by the `keys`.
    async fn load(
        &self,
        keys: &[K],
    ) -> Result<Vec<Result<Self::Value, Self::Error>>, Self::Error>;
}
