//! Core types for the kubegate public API.

mod audit;
mod cluster;
mod op;
mod request;
mod resource;
mod user;

pub use audit::{AuditEvent, AuditTemplate, OfflineHostsRequest, context_keys};
pub use cluster::{ClusterInfo, ClusterType, ManageConfig};
pub use op::{ApiOp, ApiResponse, Method, Schema, SchemaSet};
pub use request::ResourceRequest;
pub use resource::Resource;
pub use user::UserInfo;
