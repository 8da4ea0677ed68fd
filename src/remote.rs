//! HTTP adapters for the platform audit and host monitoring services.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::traits::{AuditSink, HostMonitor};
use crate::types::{AuditEvent, OfflineHostsRequest};
use crate::{KubegateError, Result};

/// Header carrying the platform user id.
pub const USER_HEADER: &str = "User-ID";
/// Header carrying the platform org id.
pub const ORG_HEADER: &str = "Org-ID";

const OFFLINE_PATH: &str = "/api/resources/hosts/actions/offline";
const AUDIT_PATH: &str = "/api/audits/actions/create";

fn client(config: &RemoteConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| KubegateError::Configuration(format!("failed to build HTTP client: {e}")))
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(KubegateError::Http(format!("{what} returned HTTP {status}: {body}")))
}

/// [`HostMonitor`] that posts to the monitor service.
pub struct HttpHostMonitor {
    client: reqwest::Client,
    url: String,
}

impl HttpHostMonitor {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            client: client(config)?,
            url: endpoint(&config.url, OFFLINE_PATH),
        })
    }
}

#[async_trait]
impl HostMonitor for HttpHostMonitor {
    async fn offline_hosts(&self, request: &OfflineHostsRequest) -> Result<()> {
        debug!(url = %self.url, cluster = %request.cluster_name, "posting offline hosts");
        let response = self
            .client
            .post(&self.url)
            .header(USER_HEADER, &request.user_id)
            .header(ORG_HEADER, &request.org_id)
            .json(request)
            .send()
            .await?;
        check_status(response, "host monitor").await
    }
}

#[derive(Serialize)]
struct AuditCreateRequest<'a> {
    audit: &'a AuditEvent,
}

/// [`AuditSink`] that posts to the audit service.
pub struct HttpAuditSink {
    client: reqwest::Client,
    url: String,
}

impl HttpAuditSink {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            client: client(config)?,
            url: endpoint(&config.url, AUDIT_PATH),
        })
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(USER_HEADER, &event.user_id)
            .header(ORG_HEADER, event.org_id.to_string())
            .json(&AuditCreateRequest { audit: &event })
            .send()
            .await?;
        check_status(response, "audit service").await
    }
}
