//! Telemetry metric name constants.
//!
//! Centralised metric names for kubegate operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `kubegate_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `operation`: dispatcher operation (e.g. "get", "list", "cordon_node")
//! - `status`: outcome: "ok" or "error"
//! - `cluster`: cluster name (only on per-cluster gauges)

/// Total operations dispatched to cluster servers.
///
/// Labels: `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "kubegate_requests_total";

/// Operation duration in seconds.
///
/// Labels: `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "kubegate_request_duration_seconds";

/// Total list-cache hits.
///
/// Labels: `state` ("fresh" | "stale").
pub const CACHE_HITS_TOTAL: &str = "kubegate_cache_hits_total";

/// Total list-cache misses.
pub const CACHE_MISSES_TOTAL: &str = "kubegate_cache_misses_total";

/// Total cache lines dropped after a successful mutation.
pub const CACHE_INVALIDATIONS_TOTAL: &str = "kubegate_cache_invalidations_total";

/// Total refresh tasks offered to the refresh queue.
///
/// Labels: `outcome` ("queued" | "duplicate" | "full" | "closed" | "ok" | "error" | "timeout").
pub const REFRESH_TASKS_TOTAL: &str = "kubegate_refresh_tasks_total";

/// Total cluster bootstrap sequences.
///
/// Labels: `status` ("ok" | "error" | "discarded").
pub const BOOTSTRAPS_TOTAL: &str = "kubegate_bootstraps_total";

/// Total registry entries reclaimed by LRU/TTL eviction.
///
/// Labels: `cause` ("expired" | "size").
pub const CLUSTER_EVICTIONS_TOTAL: &str = "kubegate_cluster_evictions_total";

/// Tasks currently waiting for an admission permit.
///
/// Labels: `cluster`.
pub const GATE_WAITING: &str = "kubegate_gate_waiting";

/// Total audit events that could not be recorded.
pub const AUDIT_FAILURES_TOTAL: &str = "kubegate_audit_failures_total";

/// Total retry attempts (not counting the initial attempt).
///
/// Labels: `operation`.
pub const RETRIES_TOTAL: &str = "kubegate_retries_total";
