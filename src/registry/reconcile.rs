//! Periodic reconciliation of the registry against the cluster inventory.
//!
//! Each tick:
//! 1. Lists every served cluster type from the inventory. If any listing
//!    fails the whole tick is skipped.
//! 2. Registers inventory clusters that have manage credentials and are not
//!    yet registered. Clusters without credentials are never registered.
//! 3. Removes registered clusters that are no longer eligible.
//!
//! Pending idle evictions are applied first, so idle clusters are released
//! even when nothing else touches the registry.
//!
//! The first tick runs immediately, so [`Reconciler::run`] also performs
//! the initial registration on startup.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ClusterRegistry;
use crate::Result;
use crate::config::{ReconcileConfig, RegistryConfig};
use crate::traits::ClusterInventory;
use crate::types::ClusterType;

/// Changes applied by one reconciliation tick. Names are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Inventory clusters without manage credentials.
    pub skipped: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct Reconciler {
    registry: ClusterRegistry,
    inventory: Arc<dyn ClusterInventory>,
    cluster_types: Vec<ClusterType>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        registry: ClusterRegistry,
        inventory: Arc<dyn ClusterInventory>,
        registry_config: &RegistryConfig,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            registry,
            inventory,
            cluster_types: registry_config.cluster_types.clone(),
            interval: config.interval(),
        }
    }

    /// Run one reconciliation pass.
    pub async fn tick(&self) -> Result<ReconcileReport> {
        self.registry.run_pending_evictions();

        let mut clusters = Vec::new();
        for cluster_type in &self.cluster_types {
            clusters.extend(self.inventory.list_clusters(cluster_type).await?);
        }

        let mut report = ReconcileReport::default();
        let mut eligible = HashSet::new();
        for cluster in clusters {
            if !self.cluster_types.contains(&cluster.cluster_type) {
                continue;
            }
            if cluster.manage_config.is_none() {
                info!(cluster = %cluster.name, "manage config for cluster is missing, skip it");
                report.skipped.push(cluster.name);
                continue;
            }
            if self.registry.add(&cluster) {
                report.added.push(cluster.name.clone());
            }
            eligible.insert(cluster.name);
        }

        for name in self.registry.cluster_names() {
            if eligible.contains(&name) {
                continue;
            }
            if self.registry.remove(&name) {
                report.removed.push(name);
            }
        }

        report.added.sort();
        report.removed.sort();
        report.skipped.sort();
        Ok(report)
    }

    /// Tick on the configured interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.interval.as_secs(),
            "cluster reconciliation started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cluster reconciliation shutting down");
                    break;
                }
                _ = ticker.tick() => match self.tick().await {
                    Ok(report) if report.is_noop() => debug!("clusters unchanged"),
                    Ok(report) => info!(
                        added = ?report.added,
                        removed = ?report.removed,
                        "clusters reconciled"
                    ),
                    Err(e) => warn!(error = %e, "failed to list clusters, skip this round"),
                },
            }
        }
    }
}
