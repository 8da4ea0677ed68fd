//! Opaque cluster resource.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;

/// A single object returned by a cluster server.
///
/// Kubegate does not model any cluster schema; a resource is a JSON document
/// with a handful of accessors for the metadata fields the dispatcher needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Value);

impl Resource {
    /// Wrap a JSON document.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// `metadata.name`, if present.
    pub fn name(&self) -> Option<&str> {
        self.str_at(&["metadata", "name"])
    }

    /// `metadata.namespace`, if present. Cluster-scoped objects have none.
    pub fn namespace(&self) -> Option<&str> {
        self.str_at(&["metadata", "namespace"])
    }

    /// Look up a string value by walking object keys.
    pub fn str_at(&self, path: &[&str]) -> Option<&str> {
        self.value_at(path).and_then(Value::as_str)
    }

    /// Look up a nested value by walking object keys.
    pub fn value_at(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(&self.0, |value, key| value.get(key))
    }

    /// Backend error payload carried by this object, if any.
    pub fn error_payload(&self) -> Option<BackendError> {
        BackendError::from_resource(self)
    }

    /// Borrow the underlying JSON document.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume the resource, returning the JSON document.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Resource {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
