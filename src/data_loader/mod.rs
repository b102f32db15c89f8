mod data_loader;
mod error;
mod field;
mod loader;
mod storage;

pub use data_loader::DataLoader;
pub use error::LoadError;
pub use field::{FieldDataLoader, FieldLoader};
pub use loader::Loader;
pub use storage::{CacheFactory, CacheStorage, HashMapCache};
