use std::time::{Duration, Instant};

/// How far along its lifetime a cache entry is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Inside the preferred window; serve as-is.
    Fresh,
    /// Past its preferred window but still servable while a refresh runs.
    Stale,
    /// Past its hard TTL; treat as absent.
    Expired,
}

/// One cached value together with its freshness metadata.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub generated_at: Instant,
    pub stale_at: Instant,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Stamp `value` with a freshness window. `stale_in` is clamped to
    /// `ttl` so `stale_at <= expires_at` always holds.
    pub fn new(value: V, stale_in: Duration, ttl: Duration) -> Self {
        let now = Instant::now();
        let stale_in = stale_in.min(ttl);
        Self {
            value,
            generated_at: now,
            stale_at: now + stale_in,
            expires_at: now + ttl,
        }
    }

    pub fn freshness(&self) -> Freshness {
        let now = Instant::now();
        if now < self.stale_at {
            Freshness::Fresh
        } else if now < self.expires_at {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Time this entry is still allowed to live, stale included.
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}
