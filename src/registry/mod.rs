//! Cluster server registry.
//!
//! Maps cluster names to [`ClusterEntry`] values. A cluster is registered
//! in two steps:
//!
//! 1. A bootstrapping placeholder is inserted under the write lock. It is
//!    visible to readers immediately, who see the cluster as not ready.
//! 2. A supervised task runs the [`bootstrap`] sequence off the caller's
//!    path and either promotes the placeholder to a ready entry or removes
//!    it.
//!
//! Because the placeholder is inserted under the lock before the task is
//! spawned, concurrent misses for the same cluster start exactly one
//! bootstrap.
//!
//! Entries are also reclaimed by LRU + idle-TTL eviction. Every path that
//! drops a ready entry (explicit removal, eviction, shutdown) cancels its
//! [`CancelHandle`] first.

mod bootstrap;
pub mod entry;
pub mod predefined;
pub mod preload;
pub mod reconcile;

pub use entry::{CancelHandle, ClusterEntry};
pub use predefined::{ClientBootstrapper, ClusterClient, PredefinedResources};
pub use preload::Preloader;
pub use reconcile::{ReconcileReport, Reconciler};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::telemetry;
use crate::traits::{ClusterInventory, ClusterServerFactory, ResourceBootstrapper};
use crate::types::{ClusterInfo, ClusterType};
use crate::{KubegateError, Result};

/// Registry of per-cluster servers. Cheap to clone.
#[derive(Clone)]
pub struct ClusterRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    entries: moka::sync::Cache<String, Arc<ClusterEntry>>,
    /// Serializes inserts and removals. Reads never take it.
    write_lock: Mutex<()>,
    inventory: Arc<dyn ClusterInventory>,
    factory: Arc<dyn ClusterServerFactory>,
    bootstrapper: Arc<dyn ResourceBootstrapper>,
    preloader: Option<Preloader>,
    cluster_types: Vec<ClusterType>,
    root: CancellationToken,
    bootstraps: TaskTracker,
}

impl Inner {
    fn write(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn serves(&self, cluster_type: &ClusterType) -> bool {
        self.cluster_types.contains(cluster_type)
    }

    /// Replace `placeholder` with `ready`, unless the placeholder has been
    /// removed or replaced in the meantime.
    fn promote(
        &self,
        name: &str,
        placeholder: &Arc<ClusterEntry>,
        ready: Arc<ClusterEntry>,
    ) -> bool {
        let _guard = self.write();
        match self.entries.get(name) {
            Some(current) if Arc::ptr_eq(&current, placeholder) => {
                self.entries.insert(name.to_string(), ready);
                true
            }
            _ => false,
        }
    }

    /// Remove the entry for `name` only if it is still `placeholder`.
    fn discard(&self, name: &str, placeholder: &Arc<ClusterEntry>) -> bool {
        let _guard = self.write();
        match self.entries.get(name) {
            Some(current) if Arc::ptr_eq(&current, placeholder) => {
                self.entries.invalidate(name);
                true
            }
            _ => false,
        }
    }
}

/// Builder for [`ClusterRegistry`].
pub struct ClusterRegistryBuilder {
    inventory: Arc<dyn ClusterInventory>,
    factory: Arc<dyn ClusterServerFactory>,
    bootstrapper: Arc<dyn ResourceBootstrapper>,
    config: RegistryConfig,
    preloader: Option<Preloader>,
    root: Option<CancellationToken>,
}

impl ClusterRegistryBuilder {
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Warm the list cache for each newly ready cluster.
    pub fn preloader(mut self, preloader: Preloader) -> Self {
        self.preloader = Some(preloader);
        self
    }

    /// Root token every cluster's work derives from.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.root = Some(token);
        self
    }

    pub fn build(self) -> ClusterRegistry {
        let entries = moka::sync::Cache::builder()
            .max_capacity(self.config.max_clusters)
            .eviction_policy(EvictionPolicy::lru())
            .time_to_idle(self.config.idle_ttl())
            .eviction_listener(
                |name: Arc<String>, entry: Arc<ClusterEntry>, cause: RemovalCause| {
                    let cause = match cause {
                        RemovalCause::Expired => "expired",
                        RemovalCause::Size => "size",
                        // Explicit removals release the entry themselves;
                        // replacements only ever swap out a placeholder.
                        RemovalCause::Explicit | RemovalCause::Replaced => return,
                    };
                    info!(cluster = %name, cause, "evicting idle cluster");
                    entry.release();
                    metrics::counter!(telemetry::CLUSTER_EVICTIONS_TOTAL, "cause" => cause)
                        .increment(1);
                },
            )
            .build();

        ClusterRegistry {
            inner: Arc::new(Inner {
                entries,
                write_lock: Mutex::new(()),
                inventory: self.inventory,
                factory: self.factory,
                bootstrapper: self.bootstrapper,
                preloader: self.preloader,
                cluster_types: self.config.cluster_types,
                root: self.root.unwrap_or_default(),
                bootstraps: TaskTracker::new(),
            }),
        }
    }
}

impl ClusterRegistry {
    pub fn builder(
        inventory: Arc<dyn ClusterInventory>,
        factory: Arc<dyn ClusterServerFactory>,
        bootstrapper: Arc<dyn ResourceBootstrapper>,
    ) -> ClusterRegistryBuilder {
        ClusterRegistryBuilder {
            inventory,
            factory,
            bootstrapper,
            config: RegistryConfig::default(),
            preloader: None,
            root: None,
        }
    }

    /// Look up a registered cluster without registering it.
    pub fn lookup(&self, name: &str) -> Option<Arc<ClusterEntry>> {
        self.inner.entries.get(name)
    }

    /// Look up a cluster, registering it from the inventory on a miss.
    ///
    /// On a miss the returned entry is the freshly inserted placeholder;
    /// bootstrap continues in the background.
    pub async fn get(&self, name: &str) -> Result<Arc<ClusterEntry>> {
        if let Some(entry) = self.lookup(name) {
            return Ok(entry);
        }

        let cluster = self.inner.inventory.get_cluster(name).await?;
        if !self.inner.serves(&cluster.cluster_type) {
            return Err(KubegateError::InvalidParameter(format!(
                "cluster {name} is not a k8s or edas cluster"
            )));
        }
        if cluster.manage_config.is_none() {
            return Err(KubegateError::InvalidParameter(format!(
                "cluster {name} has no manage config"
            )));
        }

        info!(cluster = %name, "cluster server does not exist, starting a new one");
        self.add(&cluster);
        // A bootstrap that already failed has discarded its placeholder; the
        // caller still only sees the cluster warming up.
        self.lookup(name).ok_or_else(|| not_ready(name))
    }

    /// Register `cluster` and start its bootstrap.
    ///
    /// Returns `false` without doing anything if the cluster is already
    /// registered or its type is not served.
    pub fn add(&self, cluster: &ClusterInfo) -> bool {
        if !self.inner.serves(&cluster.cluster_type) {
            debug!(cluster = %cluster.name, cluster_type = %cluster.cluster_type, "unsupported cluster type, skip adding");
            return false;
        }

        let placeholder = {
            let _guard = self.inner.write();
            if self.inner.entries.contains_key(&cluster.name) {
                debug!(cluster = %cluster.name, "cluster already registered, skip adding");
                return false;
            }
            let placeholder = Arc::new(ClusterEntry::bootstrapping(&cluster.name));
            self.inner
                .entries
                .insert(cluster.name.clone(), Arc::clone(&placeholder));
            placeholder
        };

        self.inner.bootstraps.spawn(entry::supervised(
            cluster.name.clone(),
            "bootstrap",
            bootstrap::run(Arc::clone(&self.inner), cluster.clone(), placeholder),
        ));
        true
    }

    /// Unregister a cluster, cancelling its work first if it is ready.
    ///
    /// Returns `false` if the cluster was not registered.
    pub fn remove(&self, name: &str) -> bool {
        let removed = {
            let _guard = self.inner.write();
            self.inner.entries.remove(name)
        };
        match removed {
            Some(entry) => {
                entry.release();
                info!(cluster = %name, "cluster server stopped");
                true
            }
            None => {
                debug!(cluster = %name, "cluster not registered, skip removing");
                false
            }
        }
    }

    /// Registered cluster names, split by readiness. Both lists are sorted.
    pub fn list_ready_and_unready(&self) -> (Vec<String>, Vec<String>) {
        let mut ready = Vec::new();
        let mut unready = Vec::new();
        for (name, entry) in self.inner.entries.iter() {
            if entry.is_ready() {
                ready.push(name.to_string());
            } else {
                unready.push(name.to_string());
            }
        }
        ready.sort();
        unready.sort();
        (ready, unready)
    }

    /// Every registered cluster name, sorted.
    pub fn cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .entries
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();
        names.sort();
        names
    }

    /// Whether `name` is registered and ready. Never registers.
    pub fn is_ready(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|entry| entry.is_ready())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.entries.contains_key(name)
    }

    /// Apply pending idle and capacity evictions now, cancelling the
    /// evicted ready clusters. The cache otherwise does this lazily on
    /// later reads and writes.
    pub fn run_pending_evictions(&self) {
        self.inner.entries.run_pending_tasks();
    }

    /// Serve a raw HTTP request against `cluster`.
    ///
    /// Registration, readiness and lookup failures are rendered as
    /// `{code, message}` JSON bodies.
    pub async fn serve_http(&self, cluster: &str, req: http::Request<Bytes>) -> http::Response<Bytes> {
        let entry = match self.get(cluster).await {
            Ok(entry) => entry,
            Err(e) => return error_response(&e),
        };
        match entry.server() {
            Some(server) => server.serve_http(req).await,
            None => error_response(&not_ready(cluster)),
        }
    }

    /// Cancel every cluster and wait for all background work to stop.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        self.inner.bootstraps.close();
        self.inner.bootstraps.wait().await;

        let entries: Vec<Arc<ClusterEntry>> = {
            let _guard = self.inner.write();
            let entries = self.inner.entries.iter().map(|(_, e)| e).collect();
            self.inner.entries.invalidate_all();
            entries
        };
        for entry in entries {
            entry.release();
            if let Some(cancel) = entry.cancel_handle() {
                cancel.wait().await;
            }
        }
        info!("cluster registry stopped");
    }
}

/// Error returned while a registered cluster is still bootstrapping.
pub fn not_ready(cluster: &str) -> KubegateError {
    KubegateError::NotReady(format!(
        "API for cluster {cluster} is not ready, please wait"
    ))
}

fn error_response(err: &KubegateError) -> http::Response<Bytes> {
    let body = serde_json::to_vec(&err.to_body()).unwrap_or_default();
    let mut resp = http::Response::new(Bytes::from(body));
    *resp.status_mut() =
        http::StatusCode::from_u16(err.status()).unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
    resp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    resp
}
