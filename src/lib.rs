//! Kubegate - multi-cluster resource gateway
//!
//! Kubegate fronts a fleet of clusters with one resource API. It keeps a
//! per-cluster server registry that is bootstrapped lazily and reconciled
//! against an external inventory. Reads go through a stale-while-revalidate
//! list cache, and cold list fetches are bounded per cluster.
//!
//! The cluster backends themselves are opaque: they are injected through
//! the collaborator [`traits`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kubegate::{Config, Kubegate, ResourceRequest};
//!
//! #[tokio::main]
//! async fn main() -> kubegate::Result<()> {
//!     let gateway = Kubegate::builder()
//!         .config(Config::load(None)?)
//!         .inventory(Arc::new(my_inventory))
//!         .server_factory(Arc::new(my_factory))
//!         .bootstrapper(Arc::new(my_bootstrapper))
//!         .permissions(Arc::new(my_permissions))
//!         .build()?;
//!
//!     let pods = gateway
//!         .dispatcher()
//!         .list(&ResourceRequest::new("c1", "pods").user("42", "1"))
//!         .await?;
//!     println!("{} pods", pods.len());
//!
//!     gateway.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod remote;
pub mod retry;
#[cfg(feature = "server")]
pub mod server;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export main types at crate root
pub use auth::OrgRoleAuthenticator;
pub use cache::{CacheConfig, Fingerprint, ResponseCache, TaskQueue};
pub use config::Config;
pub use dispatch::{ConcurrencyGate, ResourceDispatcher};
pub use error::{ErrorBody, KubegateError, Result};
pub use gateway::{Gateway, Kubegate, KubegateBuilder};
pub use registry::{ClusterEntry, ClusterRegistry};
pub use retry::RetryConfig;
pub use traits::{
    AuditSink, Authenticator, ClusterInventory, ClusterServer, ClusterServerFactory, HostMonitor,
    PermissionService, ResourceBootstrapper, RoleAccess,
};

// Re-export all types
pub use types::{
    ApiOp, ApiResponse, AuditEvent, AuditTemplate, ClusterInfo, ClusterType, ManageConfig, Method,
    OfflineHostsRequest, Resource, ResourceRequest, Schema, SchemaSet, UserInfo,
};
