//! Cluster inventory records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of cluster as reported by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    /// Plain Kubernetes-compatible control plane.
    K8s,
    /// EDAS-managed Kubernetes.
    Edas,
    /// Anything else (docker swarm, edge, ...). Never served.
    #[serde(other)]
    Unsupported,
}

impl ClusterType {
    /// Types the gateway can serve.
    pub fn served() -> Vec<ClusterType> {
        vec![ClusterType::K8s, ClusterType::Edas]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::K8s => "k8s",
            Self::Edas => "edas",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials the gateway uses to manage a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManageConfig {
    /// API server address.
    #[serde(default)]
    pub address: String,
    /// Bearer token, when token authentication is configured.
    #[serde(default)]
    pub token: Option<String>,
    /// PEM-encoded CA bundle.
    #[serde(default)]
    pub ca_data: Option<String>,
    /// Skip TLS verification.
    #[serde(default)]
    pub insecure: bool,
}

/// A cluster as listed by the external inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,
    /// Manage credentials; clusters without them are never registered.
    #[serde(default)]
    pub manage_config: Option<ManageConfig>,
}

impl ClusterInfo {
    /// Create a cluster record with manage credentials pointing at `address`.
    pub fn new(name: impl Into<String>, cluster_type: ClusterType, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster_type,
            manage_config: Some(ManageConfig {
                address: address.into(),
                ..Default::default()
            }),
        }
    }

    /// Drop the manage credentials.
    pub fn without_manage_config(mut self) -> Self {
        self.manage_config = None;
        self
    }
}
