//! Org-role authentication.
//!
//! Maps a platform user acting in an org to a backend identity whose groups
//! are bound to the predefined cluster roles.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::AuthConfig;
use crate::traits::{Authenticator, PermissionService};
use crate::types::{ClusterType, UserInfo};
use crate::{KubegateError, Result};

/// [`Authenticator`] backed by the platform permission service.
pub struct OrgRoleAuthenticator {
    permissions: Arc<dyn PermissionService>,
    cluster_types: Vec<ClusterType>,
    role_groups: BTreeMap<String, String>,
}

impl OrgRoleAuthenticator {
    pub fn new(permissions: Arc<dyn PermissionService>, config: &AuthConfig) -> Self {
        Self {
            permissions,
            cluster_types: ClusterType::served(),
            role_groups: config.role_groups.clone(),
        }
    }

    /// Cluster types searched for org membership. Default: k8s, edas.
    pub fn cluster_types(mut self, types: Vec<ClusterType>) -> Self {
        self.cluster_types = types;
        self
    }

    async fn org_owns(&self, org_id: u64, cluster: &str) -> Result<bool> {
        for cluster_type in &self.cluster_types {
            let names = self
                .permissions
                .list_org_clusters(org_id, cluster_type)
                .await?;
            if names.iter().any(|name| name == cluster) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn groups_for(&self, roles: &[String]) -> Vec<String> {
        let mut groups: Vec<String> = roles
            .iter()
            .filter_map(|role| self.role_groups.get(role).cloned())
            .collect();
        groups.sort();
        groups.dedup();
        groups
    }
}

#[async_trait]
impl Authenticator for OrgRoleAuthenticator {
    async fn authenticate(&self, user_id: &str, org_id: &str, cluster: &str) -> Result<UserInfo> {
        if user_id.is_empty() {
            return Err(KubegateError::NotLogin);
        }
        let org = org_id
            .parse::<u64>()
            .map_err(|e| KubegateError::InvalidParameter(format!("invalid org id {org_id}, {e}")))?;

        if !self.org_owns(org, cluster).await? {
            return Err(KubegateError::InvalidParameter(format!(
                "cluster {cluster} not found in org {org_id}"
            )));
        }

        let access = self.permissions.scope_role_access(user_id, org).await?;
        if !access.access {
            return Err(KubegateError::access_denied());
        }

        let groups = self.groups_for(&access.roles);
        if groups.is_empty() {
            debug!(user_id, org_id, roles = ?access.roles, "no role maps to a cluster group");
            return Err(KubegateError::access_denied());
        }

        let mut user = UserInfo::new(format!("kubegate-user-{user_id}"));
        user.groups = groups;
        Ok(user)
    }
}
