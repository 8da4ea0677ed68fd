//! Audit events and host monitor payloads.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{KubegateError, Result};

/// Audit template names understood by the audit service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditTemplate {
    CreateResource,
    UpdateResource,
    DeleteResource,
    LabelNode,
    UnlabelNode,
    CordonNode,
    UncordonNode,
    DrainNode,
    OfflineNode,
    OnlineNode,
}

impl AuditTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateResource => "createResource",
            Self::UpdateResource => "updateResource",
            Self::DeleteResource => "deleteResource",
            Self::LabelNode => "labelNode",
            Self::UnlabelNode => "unlabelNode",
            Self::CordonNode => "cordonNode",
            Self::UncordonNode => "uncordonNode",
            Self::DrainNode => "drainNode",
            Self::OfflineNode => "offlineNode",
            Self::OnlineNode => "onlineNode",
        }
    }
}

impl fmt::Display for AuditTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context keys rendered into audit templates.
pub mod context_keys {
    pub const CLUSTER_NAME: &str = "clusterName";
    pub const RESOURCE_TYPE: &str = "resourceType";
    pub const NAMESPACE: &str = "namespace";
    pub const NAME: &str = "name";
    pub const TARGET_LABEL: &str = "targetLabel";
}

/// A single audited mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub user_id: String,
    pub org_id: u64,
    pub template: AuditTemplate,
    pub context: BTreeMap<String, String>,
    pub result: String,
    /// Unix seconds.
    pub start_time: u64,
    /// Unix seconds.
    pub end_time: u64,
}

impl AuditEvent {
    /// Build a successful audit event.
    ///
    /// Fails when the context is empty or the org id is not numeric.
    pub fn success(
        user_id: &str,
        org_id: &str,
        template: AuditTemplate,
        context: BTreeMap<String, String>,
    ) -> Result<Self> {
        if context.is_empty() {
            return Err(KubegateError::InvalidParameter(
                "audit context is empty".to_string(),
            ));
        }
        let org_id = org_id.parse::<u64>().map_err(|_| {
            KubegateError::InvalidParameter(format!("invalid org id {org_id:?}"))
        })?;
        let now = unix_now();
        Ok(Self {
            user_id: user_id.to_string(),
            org_id,
            template,
            context,
            result: "success".to_string(),
            start_time: now,
            end_time: now,
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Notification that hosts were taken offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineHostsRequest {
    pub cluster_name: String,
    #[serde(rename = "hostIPs")]
    pub host_ips: Vec<String>,
    #[serde(skip)]
    pub user_id: String,
    #[serde(skip)]
    pub org_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BTreeMap<String, String> {
        BTreeMap::from([(context_keys::CLUSTER_NAME.to_string(), "c1".to_string())])
    }

    #[test]
    fn template_serializes_camel_case() {
        let json = serde_json::to_string(&AuditTemplate::UncordonNode).unwrap();
        assert_eq!(json, r#""uncordonNode""#);
        assert_eq!(AuditTemplate::CreateResource.to_string(), "createResource");
    }

    #[test]
    fn success_requires_numeric_org() {
        let err = AuditEvent::success("1", "acme", AuditTemplate::DrainNode, ctx()).unwrap_err();
        assert!(matches!(err, KubegateError::InvalidParameter(_)));
    }

    #[test]
    fn success_requires_context() {
        let err =
            AuditEvent::success("1", "2", AuditTemplate::DrainNode, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, KubegateError::InvalidParameter(_)));
    }

    #[test]
    fn success_event() {
        let event = AuditEvent::success("1", "2", AuditTemplate::LabelNode, ctx()).unwrap();
        assert_eq!(event.org_id, 2);
        assert_eq!(event.result, "success");
        assert!(event.end_time >= event.start_time);
    }

    #[test]
    fn offline_request_omits_identity_from_body() {
        let req = OfflineHostsRequest {
            cluster_name: "c1".into(),
            host_ips: vec!["10.0.0.1".into()],
            user_id: "1".into(),
            org_id: "2".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"clusterName": "c1", "hostIPs": ["10.0.0.1"]})
        );
    }
}
