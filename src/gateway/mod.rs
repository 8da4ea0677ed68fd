//! Gateway assembly

mod builder;

pub use builder::{Kubegate, KubegateBuilder};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::cache::{ResponseCache, TaskQueue};
use crate::config::Config;
use crate::dispatch::ResourceDispatcher;
use crate::registry::ClusterRegistry;

/// A running gateway: registry, list cache, refresh worker, reconciliation
/// loop and dispatcher, all tied to one root cancellation token.
pub struct Gateway {
    config: Config,
    registry: ClusterRegistry,
    cache: Arc<ResponseCache>,
    refresh: TaskQueue,
    dispatcher: Arc<ResourceDispatcher>,
    root: CancellationToken,
    tasks: TaskTracker,
}

impl Gateway {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn refresh_queue(&self) -> &TaskQueue {
        &self.refresh
    }

    pub fn dispatcher(&self) -> &Arc<ResourceDispatcher> {
        &self.dispatcher
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.root
    }

    /// Cancel all background work and wait for it to stop.
    pub async fn shutdown(&self) {
        self.root.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.dispatcher.wait_background().await;
        self.registry.shutdown().await;
        self.cache.clear();
        info!("kubegate stopped");
    }
}
