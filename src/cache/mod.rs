//! List caching subsystem.
//!
//! - [`response::ResponseCache`]: LRU cache of list results with a hard
//!   TTL and an earlier soft TTL. Stale hits are served immediately and
//!   refreshed in the background.
//!
//! - [`refresh::TaskQueue`]: bounded, key-deduplicating queue feeding a
//!   single [`refresh::RefreshWorker`] that performs those refreshes.
//!
//! Both are keyed by [`Fingerprint`].

pub mod refresh;
pub mod response;

pub use refresh::{Enqueue, RefreshTask, RefreshWorker, TaskQueue};
pub use response::{CacheConfig, CacheHit, Freshness, ResponseCache};

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Cache key for one list query: (resource kind, namespace, cluster).
///
/// Uses `DefaultHasher` (SipHash). The hash is deterministic within a
/// process lifetime, which is sufficient for an in-memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Key for listing `kind` in `namespace` ("" for all namespaces).
    pub fn new(kind: &str, namespace: &str, cluster: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        kind.hash(&mut hasher);
        namespace.hash(&mut hasher);
        cluster.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Key for listing `kind` across all namespaces.
    pub fn all_namespaces(kind: &str, cluster: &str) -> Self {
        Self::new(kind, "", cluster)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
