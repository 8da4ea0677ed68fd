//! Caller-facing resource request.

use serde::{Deserialize, Serialize};

/// A resource operation as issued by a platform caller.
///
/// Which fields are required depends on the operation: every operation needs
/// `cluster_name` and `kind`; operations on a single object also need `name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Platform user issuing the request.
    #[serde(default)]
    pub user_id: String,
    /// Platform organization the user acts in.
    #[serde(default)]
    pub org_id: String,
    pub cluster_name: String,
    /// Resource kind (e.g. "pods", "nodes", "apps.deployments").
    pub kind: String,
    /// Empty for cluster-scoped objects or all namespaces.
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_selector: Option<String>,
    /// Request body for create/update/patch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obj: Option<serde_json::Value>,
    /// Internal callers skip platform authentication and act as the
    /// built-in admin identity. Honoured for reads only.
    #[serde(default)]
    pub no_authentication: bool,
}

impl ResourceRequest {
    pub fn new(cluster_name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self.org_id = org_id.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn field_selector(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    pub fn obj(mut self, obj: serde_json::Value) -> Self {
        self.obj = Some(obj);
        self
    }

    pub fn internal(mut self) -> Self {
        self.no_authentication = true;
        self
    }

    /// Whether the request narrows the result with label or field selectors.
    pub fn has_selectors(&self) -> bool {
        self.label_selector.as_deref().is_some_and(|s| !s.is_empty())
            || self.field_selector.as_deref().is_some_and(|s| !s.is_empty())
    }
}
