//! Operations handed to a cluster server and the responses it returns.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Resource, UserInfo};
use crate::error::BackendError;
use crate::{KubegateError, Result};

/// Operation kind. Doubles as the authorization verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    List,
    Create,
    Update,
    Delete,
    Patch,
}

impl Method {
    /// Authorization verb for this method.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Patch => "patch",
        }
    }

    /// Whether the method changes cluster state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Update | Self::Delete | Self::Patch
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Description of one resource kind served by a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema id, matching [`ApiOp::kind`].
    pub id: String,
    /// API group ("" for the core group).
    #[serde(default)]
    pub group: String,
    /// Plural resource name.
    pub resource: String,
    #[serde(default)]
    pub namespaced: bool,
}

impl Schema {
    pub fn new(id: impl Into<String>, group: impl Into<String>, namespaced: bool) -> Self {
        let id = id.into();
        let resource = id.rsplit('.').next().unwrap_or_default().to_string();
        Self {
            id,
            group: group.into(),
            resource,
            namespaced,
        }
    }
}

/// Schemas visible to the identity of an operation.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    schemas: HashMap<String, Schema>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: Schema) {
        self.schemas.insert(schema.id.clone(), schema);
    }

    pub fn lookup(&self, id: &str) -> Option<&Schema> {
        self.schemas.get(id)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl FromIterator<Schema> for SchemaSet {
    fn from_iter<I: IntoIterator<Item = Schema>>(iter: I) -> Self {
        let mut set = SchemaSet::new();
        for schema in iter {
            set.insert(schema);
        }
        set
    }
}

/// A single operation dispatched to a [`ClusterServer`](crate::traits::ClusterServer).
#[derive(Debug, Clone)]
pub struct ApiOp {
    pub method: Method,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    /// Subresource (e.g. "eviction" for pods).
    pub subresource: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub body: Option<serde_json::Value>,
    /// Identity the server evaluates the operation as.
    pub user: UserInfo,
    /// Filled in by [`ClusterServer::set_schemas`](crate::traits::ClusterServer::set_schemas).
    pub schemas: Option<SchemaSet>,
}

impl ApiOp {
    pub fn new(method: Method, kind: impl Into<String>, user: UserInfo) -> Self {
        Self {
            method,
            kind: kind.into(),
            namespace: String::new(),
            name: String::new(),
            subresource: None,
            label_selector: None,
            field_selector: None,
            body: None,
            user,
            schemas: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn subresource(mut self, subresource: impl Into<String>) -> Self {
        self.subresource = Some(subresource.into());
        self
    }

    pub fn selectors(mut self, label: Option<String>, field: Option<String>) -> Self {
        self.label_selector = label;
        self.field_selector = field;
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// The schema for this operation's kind, once schemas are set.
    pub fn schema(&self) -> Option<&Schema> {
        self.schemas.as_ref().and_then(|s| s.lookup(&self.kind))
    }

    /// Request path in the cluster server's URL space, for logging.
    pub fn path(&self, cluster: &str) -> String {
        let mut path = format!("/api/k8s/clusters/{cluster}/v1/{}", self.kind);
        for segment in [self.namespace.as_str(), self.name.as_str()] {
            if !segment.is_empty() {
                path.push('/');
                path.push_str(segment);
            }
        }
        if let Some(sub) = &self.subresource {
            path.push('/');
            path.push_str(sub);
        }
        path
    }
}

/// What a cluster server returned for an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// A single object, which may be a `{type: "error"}` payload.
    Object(Resource),
    /// A collection from a list operation.
    Collection(Vec<Resource>),
    /// No body (e.g. some deletes).
    Empty,
}

impl ApiResponse {
    /// Expect a single object, translating error payloads.
    pub fn into_object(self) -> Result<Resource> {
        match self {
            Self::Object(obj) => match BackendError::from_resource(&obj) {
                Some(err) => Err(KubegateError::from_backend(&err)),
                None => Ok(obj),
            },
            Self::Collection(_) => Err(KubegateError::Internal(
                "unexpected collection response".to_string(),
            )),
            Self::Empty => Err(KubegateError::Internal("null response data".to_string())),
        }
    }

    /// Expect a collection, translating error payloads.
    pub fn into_collection(self) -> Result<Vec<Resource>> {
        match self {
            Self::Collection(items) => Ok(items),
            Self::Object(obj) => match BackendError::from_resource(&obj) {
                Some(err) => Err(KubegateError::from_backend(&err)),
                None => Err(KubegateError::Internal(
                    "unexpected object response to list".to_string(),
                )),
            },
            Self::Empty => Err(KubegateError::Internal("null response data".to_string())),
        }
    }

    /// Accept any response, failing only on error payloads.
    pub fn check(self) -> Result<()> {
        if let Self::Object(obj) = &self
            && let Some(err) = BackendError::from_resource(obj)
        {
            return Err(KubegateError::from_backend(&err));
        }
        Ok(())
    }
}
