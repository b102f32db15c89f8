use std::sync::Arc;
use std::time::Duration;

/// Faults of the shared cache. `Clone` because one settled generation is
/// broadcast to every caller attached to it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("cache store error: {0}")]
    Store(Arc<anyhow::Error>),

    /// The generate function failed. When a stale value exists callers
    /// never see this; it is logged and the stale value keeps serving.
    #[error("generation failed: {0}")]
    Generation(Arc<anyhow::Error>),

    /// The caller's wait for a generation ran out. The generation itself
    /// keeps running and will populate the cache for later callers.
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),
}

pub type Result<A> = std::result::Result<A, Error>;
