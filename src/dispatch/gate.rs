//! Per-cluster admission gate for uncached list requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::MIN_GATE_PERMITS;
use crate::telemetry;
use crate::{KubegateError, Result};

/// Semaphores unused for this long are dropped.
pub const DEFAULT_GATE_IDLE: Duration = Duration::from_secs(60 * 60);

/// Bounds concurrent cold fetches against each cluster.
///
/// Every cluster gets its own semaphore with `permits` slots, created on
/// first use and dropped after it has been idle for the configured time,
/// so clusters that left the registry do not accumulate.
pub struct ConcurrencyGate {
    permits: usize,
    clusters: moka::sync::Cache<String, Arc<Semaphore>>,
}

/// Held for the duration of one upstream call. Released on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate with `permits` slots per cluster (at least one).
    pub fn new(permits: usize) -> Self {
        Self::with_idle_ttl(permits, DEFAULT_GATE_IDLE)
    }

    /// Like [`new`](Self::new), dropping a cluster's semaphore after `idle`
    /// without an acquire.
    pub fn with_idle_ttl(permits: usize, idle: Duration) -> Self {
        Self {
            permits: permits.max(1),
            clusters: moka::sync::Cache::builder().time_to_idle(idle).build(),
        }
    }

    /// Gate sized from the environment override or the minimum.
    pub fn from_env() -> Self {
        Self::new(crate::config::resolve_permits(
            MIN_GATE_PERMITS,
            std::env::var(crate::config::LIST_QUEUE_SIZE_ENV)
                .ok()
                .as_deref(),
        ))
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    fn semaphore(&self, cluster: &str) -> Arc<Semaphore> {
        self.clusters
            .get_with_by_ref(cluster, || Arc::new(Semaphore::new(self.permits)))
    }

    /// Wait for a permit for `cluster`, or until `cancel` fires.
    pub async fn acquire(&self, cluster: &str, cancel: &CancellationToken) -> Result<GatePermit> {
        let semaphore = self.semaphore(cluster);
        if let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() {
            return Ok(GatePermit { _permit: permit });
        }

        let waiting = metrics::gauge!(telemetry::GATE_WAITING, "cluster" => cluster.to_string());
        waiting.increment(1.0);
        let acquired = tokio::select! {
            _ = cancel.cancelled() => None,
            permit = semaphore.acquire_owned() => permit.ok(),
        };
        waiting.decrement(1.0);

        acquired
            .map(|permit| GatePermit { _permit: permit })
            .ok_or_else(|| {
                KubegateError::Internal(format!(
                    "cancelled while waiting for list permit of cluster {cluster}"
                ))
            })
    }

    /// Permits currently free for `cluster`. Does not track the cluster.
    pub fn available(&self, cluster: &str) -> usize {
        self.clusters
            .get(cluster)
            .map_or(self.permits, |semaphore| semaphore.available_permits())
    }

    /// Number of clusters with a live semaphore.
    pub fn tracked_clusters(&self) -> u64 {
        self.clusters.run_pending_tasks();
        self.clusters.entry_count()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(MIN_GATE_PERMITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permits_are_per_cluster() {
        let gate = ConcurrencyGate::new(1);
        let cancel = CancellationToken::new();
        let _a = gate.acquire("a", &cancel).await.unwrap();
        let _b = gate
            .acquire("b", &cancel)
            .await
            .expect("other cluster is unaffected");
        assert_eq!(gate.available("a"), 0);
        assert_eq!(gate.available("b"), 0);
        assert_eq!(gate.available("c"), 1);
    }

    #[tokio::test]
    async fn permit_released_on_drop() {
        let gate = ConcurrencyGate::new(2);
        let cancel = CancellationToken::new();
        let permit = gate.acquire("a", &cancel).await.unwrap();
        assert_eq!(gate.available("a"), 1);
        drop(permit);
        assert_eq!(gate.available("a"), 2);
    }

    #[tokio::test]
    async fn cancel_unblocks_waiter() {
        let gate = ConcurrencyGate::new(1);
        let cancel = CancellationToken::new();
        let _held = gate.acquire("a", &cancel).await.unwrap();

        let waiter_cancel = CancellationToken::new();
        let trigger = waiter_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = gate.acquire("a", &waiter_cancel).await.unwrap_err();
        assert_eq!(err.code(), "InternalError");
    }

    #[tokio::test]
    async fn idle_clusters_are_forgotten() {
        let gate = ConcurrencyGate::with_idle_ttl(2, Duration::from_millis(50));
        let cancel = CancellationToken::new();
        drop(gate.acquire("gone", &cancel).await.unwrap());
        assert_eq!(gate.available("other"), 2);
        assert_eq!(gate.tracked_clusters(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(gate.tracked_clusters(), 0);

        // A returning cluster starts with a full semaphore.
        let _permit = gate.acquire("gone", &cancel).await.unwrap();
        assert_eq!(gate.available("gone"), 1);
    }
}
