//! Cache warm-up for newly ready clusters.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Fingerprint, ResponseCache};
use crate::config::PreloadConfig;
use crate::retry::{RetryConfig, with_retry};
use crate::traits::ClusterServer;
use crate::types::{ApiOp, Method, UserInfo};
use crate::Result;

/// Lists the hottest kinds across all namespaces into the response cache.
///
/// Best-effort: failures are retried with a fixed backoff and then given
/// up on. Readiness never depends on preloading.
#[derive(Clone)]
pub struct Preloader {
    cache: Arc<ResponseCache>,
    kinds: Vec<String>,
    retry: RetryConfig,
}

impl Preloader {
    pub fn new(cache: Arc<ResponseCache>, config: &PreloadConfig) -> Self {
        Self {
            cache,
            kinds: config.kinds.clone(),
            retry: config.retry(),
        }
    }

    pub fn kinds(&self) -> &[String] {
        &self.kinds
    }

    /// Preload one kind until it succeeds, retries run out, or `cancel` fires.
    pub async fn run(&self, server: Arc<dyn ClusterServer>, kind: String, cancel: CancellationToken) {
        let cluster = server.cluster_name().to_string();
        info!(cluster = %cluster, kind = %kind, "preloading cache");

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(cluster = %cluster, kind = %kind, "preload cancelled");
                return;
            }
            result = with_retry(&self.retry, "preload", || self.load(&server, &kind)) => result,
        };
        match result {
            Ok(count) => info!(cluster = %cluster, kind = %kind, count, "preloaded cache"),
            Err(e) => warn!(cluster = %cluster, kind = %kind, error = %e, "giving up preloading cache"),
        }
    }

    async fn load(&self, server: &Arc<dyn ClusterServer>, kind: &str) -> Result<usize> {
        let mut op = ApiOp::new(Method::List, kind, UserInfo::admin());
        server.set_schemas(&mut op).await?;
        let items = server.handle(&op).await?.into_collection()?;
        let count = items.len();
        self.cache
            .insert(Fingerprint::all_namespaces(kind, server.cluster_name()), items)
            .await;
        Ok(count)
    }
}
