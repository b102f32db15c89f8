//! Data-access core for an aggregation gateway that fronts many
//! independent upstream services with one query interface.
//!
//! Two primitives do the heavy lifting: per-request batching loaders
//! ([`data_loader`]) that collapse concurrent lookups into minimal
//! upstream calls, and a process-wide stale-while-revalidate cache
//! ([`cache`]) that keeps serving hot data while refreshes run behind
//! it. [`registry`] wires one set of loaders per inbound operation.

pub mod cache;
pub mod config;
pub mod data_loader;
pub mod registry;
pub mod request_context;
pub mod runtime;
pub mod source;

pub use config::{Batch, CacheConfig, Config};
pub use registry::LoaderRegistry;
pub use request_context::RequestContext;
pub use runtime::Runtime;
