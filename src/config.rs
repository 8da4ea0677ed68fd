//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path (`--config <path>`)
//! 2. `~/.kubegate/config.toml` (user)
//! 3. `/etc/kubegate/config.toml` (system)
//!
//! Every section is optional; missing keys fall back to the defaults
//! documented on each field.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::retry::RetryConfig;
use crate::types::ClusterType;
use crate::{KubegateError, Result};

/// Environment variable overriding the per-cluster gate size.
pub const LIST_QUEUE_SIZE_ENV: &str = "LIST_QUEUE_SIZE";

/// Lower bound for the per-cluster gate size.
pub const MIN_GATE_PERMITS: usize = 10;

/// Gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub preload: PreloadConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub monitor: Option<RemoteConfig>,
    #[serde(default)]
    pub audit: Option<RemoteConfig>,
}

/// HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:9742).
    #[serde(default = "default_address")]
    pub address: String,
    /// Maximum request body size in bytes (default: 4 MiB).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:9742".to_string()
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

/// Cluster server registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum registered clusters before LRU eviction (default: 1024).
    #[serde(default = "default_max_clusters")]
    pub max_clusters: u64,
    /// Idle time before an unused entry is evicted (default: 24h).
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
    /// Cluster types fetched from the inventory (default: k8s, edas).
    #[serde(default = "ClusterType::served")]
    pub cluster_types: Vec<ClusterType>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_clusters: default_max_clusters(),
            idle_ttl_secs: default_idle_ttl(),
            cluster_types: ClusterType::served(),
        }
    }
}

impl RegistryConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

fn default_max_clusters() -> u64 {
    1024
}

fn default_idle_ttl() -> u64 {
    24 * 60 * 60
}

/// Cache warm-up after a cluster becomes ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadConfig {
    /// Kinds listed into the cache (default: nodes, pods).
    #[serde(default = "default_preload_kinds")]
    pub kinds: Vec<String>,
    /// Attempts per kind (default: 10).
    #[serde(default = "default_preload_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts (default: 5s).
    #[serde(default = "default_preload_backoff")]
    pub backoff_secs: u64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            kinds: default_preload_kinds(),
            max_attempts: default_preload_attempts(),
            backoff_secs: default_preload_backoff(),
        }
    }
}

impl PreloadConfig {
    /// Fixed backoff that retries every error: a freshly ready cluster can
    /// answer `NotFound` until its discovery settles.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::fixed(self.max_attempts, Duration::from_secs(self.backoff_secs))
            .retry_all(true)
    }
}

fn default_preload_kinds() -> Vec<String> {
    vec!["nodes".to_string(), "pods".to_string()]
}

fn default_preload_attempts() -> u32 {
    10
}

fn default_preload_backoff() -> u64 {
    5
}

/// List response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Maximum cached lists (default: 10,000).
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
    /// Hard TTL in seconds (default: 30).
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Fraction of the hard TTL after which entries are stale (default: 2/3).
    #[serde(default = "default_soft_ratio")]
    pub soft_ttl_ratio: f64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl(),
            soft_ttl_ratio: default_soft_ratio(),
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_entries(self.max_entries)
            .ttl(Duration::from_secs(self.ttl_secs))
            .soft_ttl_ratio(self.soft_ttl_ratio)
    }
}

fn default_cache_entries() -> u64 {
    10_000
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_soft_ratio() -> f64 {
    2.0 / 3.0
}

/// Background refresh queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Bounded backlog (default: 1024).
    #[serde(default = "default_refresh_capacity")]
    pub capacity: usize,
    /// Per-task timeout in seconds (default: 10).
    #[serde(default = "default_refresh_timeout")]
    pub task_timeout_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            capacity: default_refresh_capacity(),
            task_timeout_secs: default_refresh_timeout(),
        }
    }
}

impl RefreshConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

fn default_refresh_capacity() -> usize {
    1024
}

fn default_refresh_timeout() -> u64 {
    10
}

/// Per-cluster admission gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Concurrent uncached lists per cluster (default: 10, minimum 10).
    #[serde(default = "default_permits")]
    pub permits: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            permits: default_permits(),
        }
    }
}

impl GateConfig {
    /// Effective permit count: `LIST_QUEUE_SIZE` from the environment when
    /// set, otherwise the configured value; never below the minimum.
    pub fn effective_permits(&self) -> usize {
        let env = std::env::var(LIST_QUEUE_SIZE_ENV).ok();
        resolve_permits(self.permits, env.as_deref())
    }
}

fn default_permits() -> usize {
    MIN_GATE_PERMITS
}

/// Resolve the gate size from a configured value and an optional override.
///
/// Unparseable overrides are ignored.
pub fn resolve_permits(configured: usize, env_override: Option<&str>) -> usize {
    let value = env_override
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(configured);
    value.max(MIN_GATE_PERMITS)
}

/// Inventory reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between ticks (default: 60).
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_reconcile_interval() -> u64 {
    60
}

/// Predefined resource bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// System namespace created in every cluster (default: kubegate-system).
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Seconds to wait for the namespace to become active (default: 60).
    #[serde(default = "default_namespace_wait")]
    pub namespace_wait_attempts: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            namespace_wait_attempts: default_namespace_wait(),
        }
    }
}

fn default_namespace() -> String {
    "kubegate-system".to_string()
}

fn default_namespace_wait() -> u32 {
    60
}

/// Platform role to backend group mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_role_groups")]
    pub role_groups: BTreeMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            role_groups: default_role_groups(),
        }
    }
}

/// Group bound to the full-access cluster role.
pub const MANAGER_GROUP: &str = "kubegate:org-manager";
/// Group bound to the read-only cluster role.
pub const SUPPORT_GROUP: &str = "kubegate:org-support";

fn default_role_groups() -> BTreeMap<String, String> {
    [
        ("Owner", MANAGER_GROUP),
        ("Lead", MANAGER_GROUP),
        ("Ops", MANAGER_GROUP),
        ("Support", SUPPORT_GROUP),
        ("Dev", SUPPORT_GROUP),
    ]
    .into_iter()
    .map(|(role, group)| (role.to_string(), group.to_string()))
    .collect()
}

/// Remote platform service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL, e.g. `http://monitor:7096`.
    pub url: String,
    /// Request timeout in seconds (default: 10).
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

fn default_remote_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.kubegate/config.toml`
    /// 3. `/etc/kubegate/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            KubegateError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            KubegateError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.cache.soft_ttl_ratio > 0.0 && self.cache.soft_ttl_ratio <= 1.0) {
            return Err(KubegateError::Configuration(format!(
                "cache.soft_ttl_ratio must be in (0, 1], got {}",
                self.cache.soft_ttl_ratio
            )));
        }
        if self.refresh.capacity == 0 {
            return Err(KubegateError::Configuration(
                "refresh.capacity must be positive".to_string(),
            ));
        }
        if self.reconcile.interval_secs == 0 {
            return Err(KubegateError::Configuration(
                "reconcile.interval_secs must be positive".to_string(),
            ));
        }
        if self.bootstrap.namespace.is_empty() {
            return Err(KubegateError::Configuration(
                "bootstrap.namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(KubegateError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".kubegate").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/kubegate/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(KubegateError::Configuration(
            "No config file found. Create ~/.kubegate/config.toml or /etc/kubegate/config.toml"
                .to_string(),
        ))
    }
}
