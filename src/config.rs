use std::time::Duration;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use crate::cache::CacheOptions;

const DEFAULT_MAX_SIZE: usize = 100;

/// Batch window settings shared by every loader of a request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Setters)]
#[serde(rename_all = "camelCase", default)]
pub struct Batch {
    /// Window length in milliseconds. Zero still batches everything
    /// registered before the flush task first runs.
    pub delay: u64,
    /// Keys that make a window flush early.
    pub max_size: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Batch { delay: 1, max_size: DEFAULT_MAX_SIZE }
    }
}

impl Batch {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.delay)
    }
}

/// Freshness settings of one shared cache, in config-file units.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Setters)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub stale_after_seconds: u64,
    pub generate_timeout_millis: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_seconds: 3600,
            stale_after_seconds: 60,
            generate_timeout_millis: 2000,
        }
    }
}

impl CacheConfig {
    pub fn to_options(&self) -> CacheOptions {
        CacheOptions::default()
            .ttl(Duration::from_secs(self.ttl_seconds))
            .stale_in(Duration::from_secs(self.stale_after_seconds))
            .generate_timeout(Duration::from_millis(self.generate_timeout_millis))
    }
}

/// Top-level gateway settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Setters)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub batch: Batch,
    pub content_cache: CacheConfig,
}
