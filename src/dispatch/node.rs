//! Node maintenance operations built on node patches.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{NODES, PODS, ResourceDispatcher, audit_context, observed, require};
use crate::registry::entry::supervised;
use crate::retry::with_retry;
use crate::traits::ClusterServer;
use crate::types::{
    ApiOp, AuditTemplate, Method, OfflineHostsRequest, Resource, ResourceRequest, UserInfo,
    context_keys,
};
use crate::{KubegateError, Result};

/// Label marking a node as taken offline.
pub const OFFLINE_LABEL: &str = "dice/offline";

fn node_context(req: &ResourceRequest) -> BTreeMap<String, String> {
    audit_context(&[
        (context_keys::CLUSTER_NAME, &req.cluster_name),
        (context_keys::NAME, &req.name),
    ])
}

fn require_node(req: &ResourceRequest) -> Result<()> {
    require(&[("clusterName", &req.cluster_name), ("name", &req.name)])
}

/// Split a `name/ip` node id.
fn parse_node_id(id: &str) -> Option<(&str, &str)> {
    let (name, ip) = id.split_once('/')?;
    if name.is_empty() || ip.is_empty() || ip.contains('/') {
        return None;
    }
    Some((name, ip))
}

/// Pods scheduled on `node`.
fn pods_on<'a>(pods: &'a [Resource], node: &'a str) -> impl Iterator<Item = &'a Resource> {
    pods.iter()
        .filter(move |pod| pod.str_at(&["spec", "nodeName"]) == Some(node))
}

async fn evict_pods(
    server: Arc<dyn ClusterServer>,
    node: String,
    pods: Vec<Resource>,
    cancel: CancellationToken,
) {
    for pod in pods_on(&pods, &node) {
        if cancel.is_cancelled() {
            warn!(node = %node, "drain interrupted by shutdown");
            return;
        }
        let (Some(namespace), Some(name)) = (pod.namespace(), pod.name()) else {
            continue;
        };
        let mut op = ApiOp::new(Method::Create, PODS, UserInfo::admin())
            .namespace(namespace)
            .name(name)
            .subresource("eviction")
            .body(json!({
                "apiVersion": "policy/v1",
                "kind": "Eviction",
                "metadata": {"name": name, "namespace": namespace}
            }));
        let result = match server.set_schemas(&mut op).await {
            Ok(()) => match server.handle(&op).await {
                Ok(resp) => resp.check(),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!(node = %node, namespace, pod = name, "pod evicted"),
            Err(e) => error!(node = %node, namespace, pod = name, error = %e, "failed to evict pod"),
        }
    }
}

impl ResourceDispatcher {
    /// Apply a merge patch to a node as the authenticated caller.
    async fn patch_node(&self, req: &ResourceRequest, body: Value) -> Result<()> {
        require_node(req)?;
        let server = self.resolve(&req.cluster_name).await?;
        let user = self.authenticate(req).await?;
        let op = ApiOp::new(Method::Patch, NODES, user)
            .name(&req.name)
            .body(body);
        self.execute(&server, op).await?.check()?;
        self.invalidate(&req.cluster_name, NODES, &req.namespace)
            .await;
        Ok(())
    }

    async fn set_labels(&self, req: &ResourceRequest, labels: &BTreeMap<String, String>) -> Result<()> {
        require_node(req)?;
        if labels.is_empty() {
            return Err(KubegateError::InvalidParameter(
                "labels are required".to_string(),
            ));
        }
        self.patch_node(req, json!({"metadata": {"labels": labels}}))
            .await
    }

    async fn remove_labels(&self, req: &ResourceRequest, labels: &[String]) -> Result<()> {
        require_node(req)?;
        if labels.is_empty() {
            return Err(KubegateError::InvalidParameter(
                "labels are required".to_string(),
            ));
        }
        let nulls: Map<String, Value> = labels
            .iter()
            .map(|label| (label.clone(), Value::Null))
            .collect();
        self.patch_node(req, json!({"metadata": {"labels": nulls}}))
            .await
    }

    async fn set_unschedulable(&self, req: &ResourceRequest, unschedulable: bool) -> Result<()> {
        self.patch_node(req, json!({"spec": {"unschedulable": unschedulable}}))
            .await
    }

    /// Add or overwrite labels on a node.
    #[instrument(skip(self, req, labels), fields(cluster = %req.cluster_name, node = %req.name))]
    pub async fn label_node(
        &self,
        req: &ResourceRequest,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        observed("label_node", async {
            self.set_labels(req, labels).await?;
            let target = labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            let mut context = node_context(req);
            context.insert(context_keys::TARGET_LABEL.to_string(), target);
            self.audit(req, AuditTemplate::LabelNode, context).await;
            Ok(())
        })
        .await
    }

    /// Remove labels from a node.
    #[instrument(skip(self, req, labels), fields(cluster = %req.cluster_name, node = %req.name))]
    pub async fn unlabel_node(&self, req: &ResourceRequest, labels: &[String]) -> Result<()> {
        observed("unlabel_node", async {
            self.remove_labels(req, labels).await?;
            let mut context = node_context(req);
            context.insert(context_keys::TARGET_LABEL.to_string(), labels.join(","));
            self.audit(req, AuditTemplate::UnlabelNode, context).await;
            Ok(())
        })
        .await
    }

    /// Mark a node unschedulable.
    #[instrument(skip(self, req), fields(cluster = %req.cluster_name, node = %req.name))]
    pub async fn cordon_node(&self, req: &ResourceRequest) -> Result<()> {
        observed("cordon_node", async {
            self.set_unschedulable(req, true).await?;
            self.audit(req, AuditTemplate::CordonNode, node_context(req))
                .await;
            Ok(())
        })
        .await
    }

    /// Mark a node schedulable again.
    #[instrument(skip(self, req), fields(cluster = %req.cluster_name, node = %req.name))]
    pub async fn uncordon_node(&self, req: &ResourceRequest) -> Result<()> {
        observed("uncordon_node", async {
            self.set_unschedulable(req, false).await?;
            self.audit(req, AuditTemplate::UncordonNode, node_context(req))
                .await;
            Ok(())
        })
        .await
    }

    /// Cordon a node and evict its pods.
    ///
    /// Returns once the node is cordoned and its pods are listed. Evictions
    /// run in the background as the admin identity; a failed eviction is
    /// logged and the rest continue.
    #[instrument(skip(self, req), fields(cluster = %req.cluster_name, node = %req.name))]
    pub async fn drain_node(&self, req: &ResourceRequest) -> Result<()> {
        observed("drain_node", async {
            self.set_unschedulable(req, true).await?;

            let pods_req = ResourceRequest::new(&req.cluster_name, PODS)
                .user(&req.user_id, &req.org_id);
            let pods = self.list_resources(&pods_req).await?;
            let server = self.resolve(&req.cluster_name).await?;

            let node = req.name.clone();
            let pods = pods.as_ref().clone();
            let cancel = self.cancel.clone();
            self.background.spawn(supervised(
                req.cluster_name.clone(),
                "drain",
                evict_pods(server, node, pods, cancel),
            ));

            self.audit(req, AuditTemplate::DrainNode, node_context(req))
                .await;
            Ok(())
        })
        .await
    }

    /// Take nodes offline.
    ///
    /// `node_ids` are `name/ip` pairs. Each node gets the offline label;
    /// malformed ids and label failures are logged and skipped. The host
    /// monitor is then told about the hosts in the background.
    #[instrument(skip(self, node_ids), fields(cluster = %cluster_name, nodes = node_ids.len()))]
    pub async fn offline_node(
        &self,
        user_id: &str,
        org_id: &str,
        cluster_name: &str,
        node_ids: &[String],
    ) -> Result<()> {
        observed("offline_node", async {
            require(&[("clusterName", cluster_name)])?;
            let offline = BTreeMap::from([(OFFLINE_LABEL.to_string(), "true".to_string())]);

            let mut names = Vec::new();
            let mut ips = Vec::new();
            for id in node_ids {
                let Some((name, ip)) = parse_node_id(id) else {
                    warn!(id = %id, "invalid node id, expected name/ip");
                    continue;
                };
                names.push(name.to_string());
                ips.push(ip.to_string());

                let req = ResourceRequest::new(cluster_name, NODES)
                    .user(user_id, org_id)
                    .name(name);
                if let Err(e) = self.set_labels(&req, &offline).await {
                    error!(node = name, error = %e, "failed to label node offline");
                }
            }

            self.notify_offline(OfflineHostsRequest {
                cluster_name: cluster_name.to_string(),
                host_ips: ips,
                user_id: user_id.to_string(),
                org_id: org_id.to_string(),
            });

            let audit_req = ResourceRequest::new(cluster_name, NODES)
                .user(user_id, org_id)
                .name(names.join(","));
            self.audit(&audit_req, AuditTemplate::OfflineNode, node_context(&audit_req))
                .await;
            Ok(())
        })
        .await
    }

    /// Bring a node back online by removing the offline label.
    #[instrument(skip(self, req), fields(cluster = %req.cluster_name, node = %req.name))]
    pub async fn online_node(&self, req: &ResourceRequest) -> Result<()> {
        observed("online_node", async {
            self.remove_labels(req, &[OFFLINE_LABEL.to_string()])
                .await?;
            self.audit(req, AuditTemplate::OnlineNode, node_context(req))
                .await;
            Ok(())
        })
        .await
    }

    fn notify_offline(&self, request: OfflineHostsRequest) {
        let Some(monitor) = self.monitor.clone() else {
            debug!(cluster = %request.cluster_name, "no host monitor configured, skipping offline notification");
            return;
        };
        let retry = self.monitor_retry.clone();
        let cancel = self.cancel.clone();
        let cluster = request.cluster_name.clone();
        self.background.spawn(supervised(cluster, "offline_notify", async move {
            let notify = with_retry(&retry, "offline_hosts", || monitor.offline_hosts(&request));
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(cluster = %request.cluster_name, "offline notification cancelled");
                }
                result = notify => match result {
                    Ok(()) => info!(cluster = %request.cluster_name, hosts = request.host_ips.len(), "hosts reported offline"),
                    Err(e) => error!(cluster = %request.cluster_name, error = %e, "failed to report offline hosts"),
                },
            }
        }));
    }
}
