mod entry;
mod error;
mod shared;
mod store;

pub use entry::{CacheEntry, Freshness};
pub use error::{Error, Result};
pub use shared::{CacheOptions, SharedCache};
pub use store::{InMemoryStore, Store};
