//! Predefined RBAC resources installed into every cluster.
//!
//! The gateway acts on clusters through a small set of service accounts,
//! cluster roles and bindings that live in a system namespace.
//! [`ClientBootstrapper`] installs them before a cluster server is started.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{BootstrapConfig, MANAGER_GROUP, SUPPORT_GROUP};
use crate::traits::ResourceBootstrapper;
use crate::types::{ClusterInfo, Resource};
use crate::{KubegateError, Result};

/// Kind of a predefined object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Namespace,
    ServiceAccount,
    ClusterRole,
    ClusterRoleBinding,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::ServiceAccount => "ServiceAccount",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One object of the predefined payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PredefinedObject {
    pub kind: ObjectKind,
    /// Empty for cluster-scoped objects.
    pub namespace: String,
    pub name: String,
    pub body: Value,
}

/// Full predefined payload for one system namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct PredefinedResources {
    pub namespace: PredefinedObject,
    pub service_accounts: Vec<PredefinedObject>,
    pub cluster_roles: Vec<PredefinedObject>,
    pub cluster_role_bindings: Vec<PredefinedObject>,
}

const MANAGER: &str = "kubegate-org-manager";
const SUPPORT: &str = "kubegate-org-support";

impl PredefinedResources {
    /// Render the payload with service accounts placed in `namespace`.
    pub fn for_namespace(namespace: &str) -> Self {
        let ns = PredefinedObject {
            kind: ObjectKind::Namespace,
            namespace: String::new(),
            name: namespace.to_string(),
            body: json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": namespace}
            }),
        };

        let service_accounts = [MANAGER, SUPPORT]
            .into_iter()
            .map(|name| PredefinedObject {
                kind: ObjectKind::ServiceAccount,
                namespace: namespace.to_string(),
                name: name.to_string(),
                body: json!({
                    "apiVersion": "v1",
                    "kind": "ServiceAccount",
                    "metadata": {"name": name, "namespace": namespace}
                }),
            })
            .collect();

        let cluster_roles = vec![
            cluster_role(MANAGER, json!(["*"])),
            cluster_role(SUPPORT, json!(["get", "list", "watch"])),
        ];

        let cluster_role_bindings = vec![
            binding(MANAGER, MANAGER_GROUP, namespace),
            binding(SUPPORT, SUPPORT_GROUP, namespace),
        ];

        Self {
            namespace: ns,
            service_accounts,
            cluster_roles,
            cluster_role_bindings,
        }
    }

    /// Every object after the namespace, in apply order.
    pub fn objects(&self) -> impl Iterator<Item = &PredefinedObject> {
        self.service_accounts
            .iter()
            .chain(&self.cluster_roles)
            .chain(&self.cluster_role_bindings)
    }

    /// The whole payload as a JSON list, namespace first.
    pub fn to_json(&self) -> Value {
        Value::Array(
            std::iter::once(&self.namespace)
                .chain(self.objects())
                .map(|o| o.body.clone())
                .collect(),
        )
    }
}

fn cluster_role(name: &str, verbs: Value) -> PredefinedObject {
    PredefinedObject {
        kind: ObjectKind::ClusterRole,
        namespace: String::new(),
        name: name.to_string(),
        body: json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRole",
            "metadata": {"name": name},
            "rules": [{"apiGroups": ["*"], "resources": ["*"], "verbs": verbs}]
        }),
    }
}

fn binding(name: &str, group: &str, namespace: &str) -> PredefinedObject {
    PredefinedObject {
        kind: ObjectKind::ClusterRoleBinding,
        namespace: String::new(),
        name: name.to_string(),
        body: json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRoleBinding",
            "metadata": {"name": name},
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "ClusterRole",
                "name": name
            },
            "subjects": [
                {"apiGroup": "rbac.authorization.k8s.io", "kind": "Group", "name": group},
                {"kind": "ServiceAccount", "name": name, "namespace": namespace}
            ]
        }),
    }
}

fn is_active(namespace: &Resource) -> bool {
    namespace.str_at(&["status", "phase"]) == Some("Active")
}

/// Minimal typed client for the objects in the predefined payload.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create an object. Existing objects fail with `Conflict`.
    async fn create(&self, cluster: &ClusterInfo, object: &PredefinedObject) -> Result<Resource>;

    async fn get(
        &self,
        cluster: &ClusterInfo,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource>;

    /// Delete an object. Missing objects fail with `NotFound`.
    async fn delete(
        &self,
        cluster: &ClusterInfo,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<()>;
}

/// [`ResourceBootstrapper`] that applies [`PredefinedResources`] through a
/// [`ClusterClient`].
pub struct ClientBootstrapper<C> {
    client: Arc<C>,
    resources: PredefinedResources,
    wait_attempts: u32,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl<C: ClusterClient> ClientBootstrapper<C> {
    pub fn new(client: Arc<C>, config: &BootstrapConfig, cancel: CancellationToken) -> Self {
        Self {
            client,
            resources: PredefinedResources::for_namespace(&config.namespace),
            wait_attempts: config.namespace_wait_attempts,
            poll_interval: Duration::from_secs(1),
            cancel,
        }
    }

    /// Interval between namespace phase checks. Default: 1s.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn ensure_namespace(&self, cluster: &ClusterInfo) -> Result<()> {
        let ns = &self.resources.namespace;
        let mut current = match self.client.create(cluster, ns).await {
            Ok(created) => Some(created),
            Err(KubegateError::Conflict(_)) => None,
            Err(e) => return Err(e),
        };

        let mut attempts = 0;
        loop {
            if current.as_ref().is_some_and(is_active) {
                return Ok(());
            }
            if attempts >= self.wait_attempts {
                return Err(KubegateError::Internal(format!(
                    "system namespace {} is not active after {} attempts",
                    ns.name, self.wait_attempts
                )));
            }
            if attempts > 0 {
                debug!(cluster = %cluster.name, namespace = %ns.name, "waiting for system namespace");
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return Err(KubegateError::Internal(
                            "failed to watch system namespace, cancelled".to_string(),
                        ));
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
            attempts += 1;
            current = Some(
                self.client
                    .get(cluster, ObjectKind::Namespace, "", &ns.name)
                    .await?,
            );
        }
    }

    async fn recreate(&self, cluster: &ClusterInfo, object: &PredefinedObject) -> Result<()> {
        match self
            .client
            .delete(cluster, object.kind, &object.namespace, &object.name)
            .await
        {
            Ok(()) | Err(KubegateError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.client.create(cluster, object).await {
            Ok(_) | Err(KubegateError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<C: ClusterClient + 'static> ResourceBootstrapper for ClientBootstrapper<C> {
    async fn ensure_predefined_resources(&self, cluster: &ClusterInfo) -> Result<()> {
        self.ensure_namespace(cluster).await?;
        for object in self.resources.objects() {
            self.recreate(cluster, object).await?;
        }
        info!(cluster = %cluster.name, "predefined resources ensured");
        Ok(())
    }
}
