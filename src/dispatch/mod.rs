//! Resource request dispatcher.
//!
//! Every operation follows the same steps:
//!
//! 1. validate required fields (`InvalidParameter` before any dispatch);
//! 2. resolve the cluster through the [`ClusterRegistry`], registering it
//!    on a miss (`NotReady` while it bootstraps);
//! 3. pick the backend identity (see [`ResourceDispatcher::identity`]);
//! 4. forward an [`ApiOp`] to the cluster server and translate error
//!    payloads.
//!
//! Successful mutations then invalidate the affected list cache lines and
//! emit a best-effort audit event.
//!
//! Lists take a cached path, see [`list`]. Node composites are in [`node`].

pub mod gate;
mod list;
mod node;

pub use gate::{ConcurrencyGate, GatePermit};
pub use node::OFFLINE_LABEL;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

use crate::cache::{Fingerprint, ResponseCache, TaskQueue};
use crate::registry::{self, ClusterRegistry};
use crate::retry::RetryConfig;
use crate::telemetry;
use crate::traits::{AuditSink, Authenticator, ClusterServer, HostMonitor};
use crate::types::{
    ApiOp, ApiResponse, AuditEvent, AuditTemplate, Method, Resource, ResourceRequest, UserInfo,
    context_keys,
};
use crate::{KubegateError, Result};

/// Resource kind of cluster nodes.
pub const NODES: &str = "nodes";
/// Resource kind of pods.
pub const PODS: &str = "pods";

/// Dispatches resource operations to cluster servers.
pub struct ResourceDispatcher {
    registry: ClusterRegistry,
    cache: Arc<ResponseCache>,
    refresh: TaskQueue,
    gate: Arc<ConcurrencyGate>,
    auth: Arc<dyn Authenticator>,
    audit: Option<Arc<dyn AuditSink>>,
    monitor: Option<Arc<dyn HostMonitor>>,
    monitor_retry: RetryConfig,
    cancel: CancellationToken,
    background: TaskTracker,
}

/// Builder for [`ResourceDispatcher`].
pub struct ResourceDispatcherBuilder {
    registry: ClusterRegistry,
    cache: Arc<ResponseCache>,
    refresh: TaskQueue,
    auth: Arc<dyn Authenticator>,
    gate: Option<Arc<ConcurrencyGate>>,
    audit: Option<Arc<dyn AuditSink>>,
    monitor: Option<Arc<dyn HostMonitor>>,
    monitor_retry: RetryConfig,
    cancel: Option<CancellationToken>,
}

impl ResourceDispatcherBuilder {
    pub fn gate(mut self, gate: Arc<ConcurrencyGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn HostMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Retry policy for host monitor notifications. Default: 5 attempts.
    pub fn monitor_retry(mut self, retry: RetryConfig) -> Self {
        self.monitor_retry = retry;
        self
    }

    /// Token that aborts gate waits and background work.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> ResourceDispatcher {
        ResourceDispatcher {
            registry: self.registry,
            cache: self.cache,
            refresh: self.refresh,
            gate: self.gate.unwrap_or_else(|| Arc::new(ConcurrencyGate::from_env())),
            auth: self.auth,
            audit: self.audit,
            monitor: self.monitor,
            monitor_retry: self.monitor_retry,
            cancel: self.cancel.unwrap_or_default(),
            background: TaskTracker::new(),
        }
    }
}

fn record(operation: &'static str, start: Instant, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(telemetry::REQUESTS_TOTAL, "operation" => operation, "status" => status)
        .increment(1);
    metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS, "operation" => operation)
        .record(start.elapsed().as_secs_f64());
}

async fn observed<T, F>(operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    if let Err(e) = &result {
        debug!(operation, error = %e, "operation failed");
    }
    record(operation, start, result.is_ok());
    result
}

/// Fail with `InvalidParameter` naming the missing fields.
fn require(fields: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(KubegateError::InvalidParameter(format!(
            "{} fields are required",
            missing.join(", ")
        )))
    }
}

fn required_body(req: &ResourceRequest) -> Result<serde_json::Value> {
    req.obj
        .clone()
        .ok_or_else(|| KubegateError::InvalidParameter("obj field is required".to_string()))
}

fn audit_context(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl ResourceDispatcher {
    pub fn builder(
        registry: ClusterRegistry,
        cache: Arc<ResponseCache>,
        refresh: TaskQueue,
        auth: Arc<dyn Authenticator>,
    ) -> ResourceDispatcherBuilder {
        ResourceDispatcherBuilder {
            registry,
            cache,
            refresh,
            auth,
            gate: None,
            audit: None,
            monitor: None,
            monitor_retry: RetryConfig::fixed(5, std::time::Duration::from_secs(1)),
            cancel: None,
        }
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    /// Fetch one object.
    #[instrument(skip(self, req), fields(cluster = %req.cluster_name, kind = %req.kind, name = %req.name))]
    pub async fn get(&self, req: &ResourceRequest) -> Result<Resource> {
        observed("get", async {
            require(&[
                ("clusterName", &req.cluster_name),
                ("name", &req.name),
                ("type", &req.kind),
            ])?;
            let server = self.resolve(&req.cluster_name).await?;
            let user = self.identity(req).await?;
            let op = ApiOp::new(Method::Get, &req.kind, user)
                .namespace(&req.namespace)
                .name(&req.name);
            self.execute(&server, op).await?.into_object()
        })
        .await
    }

    /// List objects, through the response cache where possible.
    #[instrument(skip(self, req), fields(cluster = %req.cluster_name, kind = %req.kind, namespace = %req.namespace))]
    pub async fn list(&self, req: &ResourceRequest) -> Result<Arc<Vec<Resource>>> {
        observed("list", self.list_resources(req)).await
    }

    /// Create the object in `req.obj`.
    #[instrument(skip(self, req), fields(cluster = %req.cluster_name, kind = %req.kind))]
    pub async fn create(&self, req: &ResourceRequest) -> Result<Resource> {
        observed("create", async {
            require(&[("clusterName", &req.cluster_name), ("type", &req.kind)])?;
            let body = required_body(req)?;
            let server = self.resolve(&req.cluster_name).await?;
            let user = self.authenticate(req).await?;

            let body_meta = Resource::new(body.clone());
            let namespace = match body_meta.namespace() {
                Some(ns) if req.namespace.is_empty() => ns.to_string(),
                _ => req.namespace.clone(),
            };
            let name = body_meta.name().unwrap_or_default().to_string();

            let op = ApiOp::new(Method::Create, &req.kind, user)
                .namespace(&namespace)
                .body(body);
            let created = self.execute(&server, op).await?.into_object()?;

            self.invalidate(&req.cluster_name, &req.kind, &namespace)
                .await;
            self.audit(
                req,
                AuditTemplate::CreateResource,
                audit_context(&[
                    (context_keys::CLUSTER_NAME, &req.cluster_name),
                    (context_keys::RESOURCE_TYPE, &req.kind),
                    (context_keys::NAMESPACE, &namespace),
                    (context_keys::NAME, &name),
                ]),
            )
            .await;
            Ok(created)
        })
        .await
    }

    /// Replace an object with `req.obj`.
    #[instrument(skip(self, req), fields(cluster = %req.cluster_name, kind = %req.kind, name = %req.name))]
    pub async fn update(&self, req: &ResourceRequest) -> Result<Resource> {
        observed("update", async {
            self.mutate(req, Method::Update, AuditTemplate::UpdateResource)
                .await
        })
        .await
    }

    /// Patch an object with the merge patch in `req.obj`.
    #[instrument(skip(self, req), fields(cluster = %req.cluster_name, kind = %req.kind, name = %req.name))]
    pub async fn patch(&self, req: &ResourceRequest) -> Result<Resource> {
        observed("patch", async {
            self.mutate(req, Method::Patch, AuditTemplate::UpdateResource)
                .await
        })
        .await
    }

    /// Delete an object.
    #[instrument(skip(self, req), fields(cluster = %req.cluster_name, kind = %req.kind, name = %req.name))]
    pub async fn delete(&self, req: &ResourceRequest) -> Result<()> {
        observed("delete", async {
            require(&[
                ("clusterName", &req.cluster_name),
                ("name", &req.name),
                ("type", &req.kind),
            ])?;
            let server = self.resolve(&req.cluster_name).await?;
            let user = self.authenticate(req).await?;
            let op = ApiOp::new(Method::Delete, &req.kind, user)
                .namespace(&req.namespace)
                .name(&req.name);
            self.execute(&server, op).await?.check()?;

            self.invalidate(&req.cluster_name, &req.kind, &req.namespace)
                .await;
            self.audit(req, AuditTemplate::DeleteResource, self.resource_context(req))
                .await;
            Ok(())
        })
        .await
    }

    /// Wait for background work (drain evictions, monitor notifications)
    /// started so far.
    pub async fn wait_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    /// Update or patch an existing object, then invalidate and audit.
    async fn mutate(
        &self,
        req: &ResourceRequest,
        method: Method,
        template: AuditTemplate,
    ) -> Result<Resource> {
        require(&[
            ("clusterName", &req.cluster_name),
            ("name", &req.name),
            ("type", &req.kind),
        ])?;
        let body = required_body(req)?;
        let server = self.resolve(&req.cluster_name).await?;
        let user = self.authenticate(req).await?;
        let op = ApiOp::new(method, &req.kind, user)
            .namespace(&req.namespace)
            .name(&req.name)
            .body(body);
        let obj = self.execute(&server, op).await?.into_object()?;

        self.invalidate(&req.cluster_name, &req.kind, &req.namespace)
            .await;
        self.audit(req, template, self.resource_context(req)).await;
        Ok(obj)
    }

    fn resource_context(&self, req: &ResourceRequest) -> BTreeMap<String, String> {
        audit_context(&[
            (context_keys::CLUSTER_NAME, &req.cluster_name),
            (context_keys::RESOURCE_TYPE, &req.kind),
            (context_keys::NAMESPACE, &req.namespace),
            (context_keys::NAME, &req.name),
        ])
    }

    /// Resolve a ready cluster server, registering the cluster on a miss.
    async fn resolve(&self, cluster: &str) -> Result<Arc<dyn ClusterServer>> {
        let entry = self.registry.get(cluster).await?;
        entry
            .server()
            .cloned()
            .ok_or_else(|| registry::not_ready(cluster))
    }

    /// Backend identity for a read.
    ///
    /// Node reads and internal (`no_authentication`) reads run as the
    /// built-in admin; everything else is authenticated.
    async fn identity(&self, req: &ResourceRequest) -> Result<UserInfo> {
        if req.kind == NODES || req.no_authentication {
            return Ok(UserInfo::admin());
        }
        self.authenticate(req).await
    }

    async fn authenticate(&self, req: &ResourceRequest) -> Result<UserInfo> {
        self.auth
            .authenticate(&req.user_id, &req.org_id, &req.cluster_name)
            .await
    }

    async fn execute(&self, server: &Arc<dyn ClusterServer>, mut op: ApiOp) -> Result<ApiResponse> {
        if op.schemas.is_none() {
            server.set_schemas(&mut op).await?;
        }
        server.handle(&op).await
    }

    /// Drop the all-namespaces and per-namespace list lines for `kind`.
    async fn invalidate(&self, cluster: &str, kind: &str, namespace: &str) {
        self.cache
            .invalidate(&Fingerprint::all_namespaces(kind, cluster))
            .await;
        if !namespace.is_empty() {
            self.cache
                .invalidate(&Fingerprint::new(kind, namespace, cluster))
                .await;
        }
    }

    /// Record an audit event. Failures are logged, never returned.
    async fn audit(
        &self,
        req: &ResourceRequest,
        template: AuditTemplate,
        context: BTreeMap<String, String>,
    ) {
        let Some(sink) = &self.audit else {
            return;
        };
        let result = match AuditEvent::success(&req.user_id, &req.org_id, template, context) {
            Ok(event) => sink.record(event).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(template = %template, error = %e, "failed to record audit event");
            metrics::counter!(telemetry::AUDIT_FAILURES_TOTAL).increment(1);
        }
    }
}
