//! List response cache with stale-while-revalidate.
//!
//! Each entry carries two thresholds measured from the moment it was
//! stored:
//!
//! - **soft TTL**: past it the entry is still returned, marked
//!   [`Freshness::Stale`], and the caller is expected to schedule a
//!   background refresh.
//! - **hard TTL**: past it moka drops the entry and lookups miss.
//!
//! Any write resets the entry to fresh. Values are shared behind an `Arc`
//! so readers get a consistent snapshot even while a refresh replaces it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;

use super::Fingerprint;
use crate::telemetry;
use crate::types::Resource;

/// Configuration for the list response cache.
///
/// ```rust
/// # use kubegate::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(10_000)
///     .ttl(Duration::from_secs(30))
///     .soft_ttl_ratio(0.5);
/// assert_eq!(config.soft_ttl(), Duration::from_secs(15));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached lists. Default: 10,000.
    pub max_entries: u64,
    /// Hard time-to-live. Default: 30 seconds.
    pub ttl: Duration,
    /// Soft TTL as a fraction of `ttl`. Default: 2/3.
    pub soft_ttl_ratio: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(30),
            soft_ttl_ratio: 2.0 / 3.0,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached lists.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the hard time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the soft TTL fraction, clamped to `(0, 1]`.
    pub fn soft_ttl_ratio(mut self, ratio: f64) -> Self {
        self.soft_ttl_ratio = ratio;
        self
    }

    /// Age after which a hit is stale.
    pub fn soft_ttl(&self) -> Duration {
        soft_ttl_for(self.ttl, self.soft_ttl_ratio)
    }
}

fn soft_ttl_for(ttl: Duration, ratio: f64) -> Duration {
    let ratio = if ratio.is_finite() {
        ratio.clamp(f64::EPSILON, 1.0)
    } else {
        1.0
    };
    ttl.mul_f64(ratio)
}

/// Whether a hit is still within its soft TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// A cache hit.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub resources: Arc<Vec<Resource>>,
    pub freshness: Freshness,
}

impl CacheHit {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    resources: Arc<Vec<Resource>>,
    stored_at: Instant,
    ttl: Duration,
    soft_ttl: Duration,
}

impl CacheEntry {
    fn freshness(&self, now: Instant) -> Option<Freshness> {
        let age = now.saturating_duration_since(self.stored_at);
        if age >= self.ttl {
            None
        } else if age >= self.soft_ttl {
            Some(Freshness::Stale)
        } else {
            Some(Freshness::Fresh)
        }
    }
}

/// Per-entry expiry: every write restarts the entry's own hard TTL.
struct EntryExpiry;

impl Expiry<Fingerprint, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &Fingerprint,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory list cache.
///
/// Explicitly constructed and shared through an `Arc`; there is no
/// process-wide instance.
pub struct ResponseCache {
    cache: Cache<Fingerprint, CacheEntry>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(EntryExpiry)
            .build();
        Self {
            cache,
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a cached list.
    ///
    /// Returns `None` on miss or once the hard TTL has passed. Emits cache
    /// hit/miss metrics.
    pub async fn get(&self, key: &Fingerprint) -> Option<CacheHit> {
        let hit = self.lookup(key).await;
        match &hit {
            Some(CacheHit {
                freshness: Freshness::Fresh,
                ..
            }) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "state" => "fresh").increment(1);
            }
            Some(CacheHit {
                freshness: Freshness::Stale,
                ..
            }) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "state" => "stale").increment(1);
            }
            None => metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1),
        }
        hit
    }

    /// Look up a list only if it is still fresh. Does not emit metrics.
    pub async fn get_fresh(&self, key: &Fingerprint) -> Option<Arc<Vec<Resource>>> {
        self.lookup(key)
            .await
            .filter(|hit| !hit.is_stale())
            .map(|hit| hit.resources)
    }

    async fn lookup(&self, key: &Fingerprint) -> Option<CacheHit> {
        let entry = self.cache.get(key).await?;
        let freshness = entry.freshness(Instant::now())?;
        Some(CacheHit {
            resources: entry.resources,
            freshness,
        })
    }

    /// Store a list with the configured TTL, replacing any prior value.
    pub async fn insert(&self, key: Fingerprint, resources: impl Into<Arc<Vec<Resource>>>) {
        self.insert_with_ttl(key, resources, self.config.ttl).await;
    }

    /// Store a list with an explicit hard TTL. The soft TTL keeps the
    /// configured ratio.
    pub async fn insert_with_ttl(
        &self,
        key: Fingerprint,
        resources: impl Into<Arc<Vec<Resource>>>,
        ttl: Duration,
    ) {
        let entry = CacheEntry {
            resources: resources.into(),
            stored_at: Instant::now(),
            ttl,
            soft_ttl: soft_ttl_for(ttl, self.config.soft_ttl_ratio),
        };
        self.cache.insert(key, entry).await;
    }

    /// Drop a cached list.
    pub async fn invalidate(&self, key: &Fingerprint) {
        self.cache.invalidate(key).await;
        metrics::counter!(telemetry::CACHE_INVALIDATIONS_TOTAL).increment(1);
    }

    /// Drop every cached list.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}
