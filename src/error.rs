//! Kubegate error types

use serde::{Deserialize, Serialize};

use crate::types::Resource;

/// Kubegate error types
#[derive(Debug, thiserror::Error)]
pub enum KubegateError {
    // Caller errors
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("not login")]
    NotLogin,

    #[error("access denied: {0}")]
    AccessDenied(String),

    // Cluster state
    /// The cluster is registered but its server is still bootstrapping.
    /// Callers may retry with backoff.
    #[error("{0}")]
    NotReady(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    // Backend/transport errors
    #[error("internal error: {0}")]
    Internal(String),

    /// Structured error payload returned by a cluster server.
    #[error("upstream error ({code}): {message}")]
    Upstream { code: String, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl KubegateError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) | Self::Json(_) => "InvalidParameter",
            Self::NotLogin => "NotLogin",
            Self::AccessDenied(_) => "AccessDenied",
            Self::NotReady(_) => "NotReady",
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::Internal(_) | Self::Upstream { .. } | Self::Http(_) | Self::Configuration(_) => {
                "InternalError"
            }
        }
    }

    /// HTTP status code used when rendering this error to callers.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidParameter(_) | Self::Json(_) => 400,
            Self::NotLogin => 401,
            Self::AccessDenied(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::NotReady(_) => 503,
            Self::Internal(_) | Self::Upstream { .. } | Self::Http(_) | Self::Configuration(_) => {
                500
            }
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Caller mistakes and authorization failures are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotReady(_) | Self::Internal(_) | Self::Upstream { .. } | Self::Http(_)
        )
    }

    /// Convenience constructor for an access-denied error with the default message.
    pub fn access_denied() -> Self {
        Self::AccessDenied("the user has no permission for this operation".to_string())
    }

    /// Translate a backend `{type: "error", code, message}` payload.
    pub fn from_backend(payload: &BackendError) -> Self {
        let message = payload.message.clone();
        match payload.code.as_str() {
            "NotFound" => Self::NotFound(message),
            "Forbidden" | "PermissionDenied" => Self::AccessDenied(message),
            "AlreadyExists" | "Conflict" => Self::Conflict(message),
            "BadRequest" | "InvalidBody" => Self::InvalidParameter(message),
            code if code.starts_with("Invalid") => Self::InvalidParameter(message),
            _ => Self::Upstream {
                code: payload.code.clone(),
                message,
            },
        }
    }

    /// Structured body rendered to callers.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for KubegateError {
    fn from(err: reqwest::Error) -> Self {
        KubegateError::Http(err.to_string())
    }
}

/// Error payload as emitted by a cluster server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl BackendError {
    /// Extract the error payload from a resource when its `type` is `"error"`.
    pub fn from_resource(resource: &Resource) -> Option<Self> {
        if resource.str_at(&["type"]) != Some("error") {
            return None;
        }
        Some(Self {
            code: resource.str_at(&["code"]).unwrap_or_default().to_string(),
            message: resource.str_at(&["message"]).unwrap_or_default().to_string(),
        })
    }
}

/// Structured error returned to callers: stable code plus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Result type alias for Kubegate operations
pub type Result<T> = std::result::Result<T, KubegateError>;
