//! Cached list path.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ResourceDispatcher, require};
use crate::cache::{Fingerprint, RefreshTask, ResponseCache};
use crate::registry;
use crate::traits::ClusterServer;
use crate::types::{ApiOp, Method, Resource, ResourceRequest};
use crate::{KubegateError, Result};

async fn fetch(server: &dyn ClusterServer, op: &ApiOp) -> Result<Vec<Resource>> {
    server.handle(op).await?.into_collection()
}

fn in_namespace(resources: &[Resource], namespace: &str) -> Vec<Resource> {
    resources
        .iter()
        .filter(|r| r.namespace() == Some(namespace))
        .cloned()
        .collect()
}

impl ResourceDispatcher {
    pub(super) async fn list_resources(&self, req: &ResourceRequest) -> Result<Arc<Vec<Resource>>> {
        require(&[("clusterName", &req.cluster_name), ("type", &req.kind)])?;

        let entry = self.registry.get(&req.cluster_name).await?;
        let server = entry
            .server()
            .cloned()
            .ok_or_else(|| registry::not_ready(&req.cluster_name))?;
        let user = self.identity(req).await?;
        let mut op = ApiOp::new(Method::List, &req.kind, user)
            .namespace(&req.namespace)
            .selectors(req.label_selector.clone(), req.field_selector.clone());
        server.set_schemas(&mut op).await?;

        if req.has_selectors() {
            debug!(cluster = %req.cluster_name, kind = %req.kind, "selectors present, bypassing cache");
            return fetch(server.as_ref(), &op).await.map(Arc::new);
        }

        let schema = op.schema().ok_or_else(|| {
            KubegateError::NotReady(format!(
                "schema of {} in cluster {} is not ready, please wait",
                req.kind, req.cluster_name
            ))
        })?;
        if !server.grants(&op.user, Method::List.verb(), schema, &req.namespace) {
            return Err(KubegateError::access_denied());
        }

        let key = Fingerprint::new(&req.kind, &req.namespace, &req.cluster_name);
        if let Some(hit) = self.cache.get(&key).await {
            if hit.is_stale()
                && let Some(cancel) = entry.cancel_handle()
            {
                self.schedule_refresh(key, server, op, cancel.token().clone());
            }
            return Ok(hit.resources);
        }

        if !req.namespace.is_empty()
            && let Some(all) = self
                .cache
                .get_fresh(&Fingerprint::all_namespaces(&req.kind, &req.cluster_name))
                .await
        {
            debug!(kind = %req.kind, namespace = %req.namespace, "served from all-namespaces list");
            return Ok(Arc::new(in_namespace(&all, &req.namespace)));
        }

        info!(cluster = %req.cluster_name, kind = %req.kind, "list cache miss, fetching from cluster");
        let items = {
            let _permit = self.gate.acquire(&req.cluster_name, &self.cancel).await?;
            fetch(server.as_ref(), &op).await?
        };
        let items = Arc::new(items);
        self.cache.insert(key, Arc::clone(&items)).await;
        Ok(items)
    }

    /// Queue a background re-fetch of a stale list. The op is reused with
    /// its resolved schemas and identity.
    ///
    /// `released` is the cluster's cancel token. Once the cluster has been
    /// removed the task neither fetches nor writes back.
    fn schedule_refresh(
        &self,
        key: Fingerprint,
        server: Arc<dyn ClusterServer>,
        op: ApiOp,
        released: CancellationToken,
    ) {
        let cache: Arc<ResponseCache> = Arc::clone(&self.cache);
        let task = RefreshTask::new(key, async move {
            if released.is_cancelled() {
                debug!(cluster = %server.cluster_name(), key = %key, "cluster removed, skipping refresh");
                return Ok(());
            }
            let items = fetch(server.as_ref(), &op).await?;
            if released.is_cancelled() {
                debug!(cluster = %server.cluster_name(), key = %key, "cluster removed during refresh, dropping result");
                return Ok(());
            }
            cache.insert(key, items).await;
            Ok(())
        });
        self.refresh.enqueue(task);
    }
}
