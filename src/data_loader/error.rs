/// Faults a loader can hand back for a single key.
///
/// Every variant is `Clone` because one settled batch answers all of its
/// concurrent waiters, and because results stay cached for the rest of
/// the request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError<E> {
    /// The key could not be resolved; the rest of its batch is unaffected.
    #[error("key could not be resolved: {0}")]
    Key(E),

    /// The batch fetch itself failed before any per-key outcome was known.
    #[error("batch fetch failed: {0}")]
    Batch(E),

    /// The adapter broke its contract and returned a result list whose
    /// length does not match the key list.
    #[error("batch fetch returned {actual} results for {expected} keys")]
    Mismatch { expected: usize, actual: usize },

    /// A field-aware fetch response omitted a field it was asked for.
    #[error("upstream response omitted requested field `{0}`")]
    MissingField(String),
}

impl<E> LoadError<E> {
    /// True when the fault is scoped to one key and resolvers may degrade
    /// to a partial response instead of failing the operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LoadError::Key(_) | LoadError::MissingField(_))
    }
}
