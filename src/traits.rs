//! Collaborator traits
//!
//! The registry and dispatcher depend only on these abstractions; concrete
//! backends (a real cluster API server, the platform's permission service,
//! the audit service) are injected through the
//! [`KubegateBuilder`](crate::KubegateBuilder).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::types::{
    ApiOp, ApiResponse, AuditEvent, ClusterInfo, ClusterType, OfflineHostsRequest, Schema,
    UserInfo,
};

/// A running API server bound to one cluster.
///
/// Created by a [`ClusterServerFactory`] during bootstrap and owned by the
/// registry entry for that cluster.
#[async_trait]
pub trait ClusterServer: Send + Sync {
    /// Name of the cluster this server is bound to.
    fn cluster_name(&self) -> &str;

    /// Populate `op.schemas` with the schemas visible to `op.user`.
    async fn set_schemas(&self, op: &mut ApiOp) -> Result<()>;

    /// Whether `user` may perform `verb` on `schema` in `namespace`
    /// (empty namespace means all namespaces).
    fn grants(&self, user: &UserInfo, verb: &str, schema: &Schema, namespace: &str) -> bool;

    /// Execute an operation.
    ///
    /// Backend rejections may come back as `Ok` with an error payload;
    /// use [`ApiResponse::into_object`]/[`ApiResponse::into_collection`]
    /// to translate them.
    async fn handle(&self, op: &ApiOp) -> Result<ApiResponse>;

    /// Serve a raw HTTP request against this cluster.
    async fn serve_http(&self, req: http::Request<Bytes>) -> http::Response<Bytes>;
}

/// Builds cluster servers.
#[async_trait]
pub trait ClusterServerFactory: Send + Sync {
    /// Construct a server for `cluster`. Background work the server starts
    /// must stop when `cancel` is cancelled.
    async fn create(
        &self,
        cluster: &ClusterInfo,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn ClusterServer>>;
}

/// External source of truth for which clusters exist.
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    async fn list_clusters(&self, cluster_type: &ClusterType) -> Result<Vec<ClusterInfo>>;

    /// Look up one cluster. Unknown clusters are `NotFound`.
    async fn get_cluster(&self, name: &str) -> Result<ClusterInfo>;
}

/// Installs the service accounts, roles and bindings the gateway relies on.
#[async_trait]
pub trait ResourceBootstrapper: Send + Sync {
    /// Idempotently ensure the predefined resources exist in `cluster`.
    async fn ensure_predefined_resources(&self, cluster: &ClusterInfo) -> Result<()>;
}

/// Maps a platform identity to a backend identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, user_id: &str, org_id: &str, cluster: &str) -> Result<UserInfo>;
}

/// Result of a scope role access check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleAccess {
    pub access: bool,
    pub roles: Vec<String>,
}

/// Platform permission service.
#[async_trait]
pub trait PermissionService: Send + Sync {
    /// Names of the clusters of `cluster_type` owned by `org_id`.
    async fn list_org_clusters(&self, org_id: u64, cluster_type: &ClusterType)
    -> Result<Vec<String>>;

    /// Whether `user_id` has access to the org scope, and with which roles.
    async fn scope_role_access(&self, user_id: &str, org_id: u64) -> Result<RoleAccess>;
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Host monitoring service notified when nodes go offline.
#[async_trait]
pub trait HostMonitor: Send + Sync {
    async fn offline_hosts(&self, request: &OfflineHostsRequest) -> Result<()>;
}
