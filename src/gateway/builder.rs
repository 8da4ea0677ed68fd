//! Builder for assembling a running gateway

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use super::Gateway;
use crate::auth::OrgRoleAuthenticator;
use crate::cache::{ResponseCache, TaskQueue};
use crate::config::Config;
use crate::dispatch::{ConcurrencyGate, ResourceDispatcher};
use crate::registry::entry::supervised;
use crate::registry::{ClusterRegistry, Preloader, Reconciler};
use crate::remote::{HttpAuditSink, HttpHostMonitor};
use crate::traits::{
    AuditSink, Authenticator, ClusterInventory, ClusterServerFactory, HostMonitor,
    PermissionService, ResourceBootstrapper,
};
use crate::{KubegateError, Result};

/// Main entry point for creating gateway instances.
pub struct Kubegate;

impl Kubegate {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> KubegateBuilder {
        KubegateBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// The inventory, server factory and bootstrapper are required, as is one
/// of [`authenticator`](Self::authenticator) or
/// [`permissions`](Self::permissions). Audit and host monitor adapters are
/// taken from the builder first, then from `[audit]`/`[monitor]` in the
/// config.
pub struct KubegateBuilder {
    config: Config,
    inventory: Option<Arc<dyn ClusterInventory>>,
    factory: Option<Arc<dyn ClusterServerFactory>>,
    bootstrapper: Option<Arc<dyn ResourceBootstrapper>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    permissions: Option<Arc<dyn PermissionService>>,
    audit: Option<Arc<dyn AuditSink>>,
    monitor: Option<Arc<dyn HostMonitor>>,
    cancel: Option<CancellationToken>,
    reconcile: bool,
}

impl Default for KubegateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KubegateBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            inventory: None,
            factory: None,
            bootstrapper: None,
            authenticator: None,
            permissions: None,
            audit: None,
            monitor: None,
            cancel: None,
            reconcile: true,
        }
    }

    /// Use a loaded configuration (default: [`Config::default`]).
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn inventory(mut self, inventory: Arc<dyn ClusterInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn server_factory(mut self, factory: Arc<dyn ClusterServerFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn bootstrapper(mut self, bootstrapper: Arc<dyn ResourceBootstrapper>) -> Self {
        self.bootstrapper = Some(bootstrapper);
        self
    }

    /// Use a custom authenticator instead of [`OrgRoleAuthenticator`].
    pub fn authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(auth);
        self
    }

    /// Authenticate through an [`OrgRoleAuthenticator`] over this service.
    pub fn permissions(mut self, permissions: Arc<dyn PermissionService>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn host_monitor(mut self, monitor: Arc<dyn HostMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Root token for all background work. Default: a fresh token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Disable the periodic inventory reconciliation loop.
    pub fn without_reconcile(mut self) -> Self {
        self.reconcile = false;
        self
    }

    fn required<T>(value: Option<T>, what: &str) -> Result<T> {
        value.ok_or_else(|| KubegateError::Configuration(format!("{what} is required")))
    }

    /// Build the gateway and start its background workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<Gateway> {
        let config = self.config;
        config.validate()?;

        let inventory = Self::required(self.inventory, "cluster inventory")?;
        let factory = Self::required(self.factory, "cluster server factory")?;
        let bootstrapper = Self::required(self.bootstrapper, "resource bootstrapper")?;
        let auth: Arc<dyn Authenticator> = match (self.authenticator, self.permissions) {
            (Some(auth), _) => auth,
            (None, Some(permissions)) => Arc::new(
                OrgRoleAuthenticator::new(permissions, &config.auth)
                    .cluster_types(config.registry.cluster_types.clone()),
            ),
            (None, None) => {
                return Err(KubegateError::Configuration(
                    "an authenticator or permission service is required".to_string(),
                ));
            }
        };

        let audit = match (self.audit, &config.audit) {
            (Some(sink), _) => Some(sink),
            (None, Some(remote)) => Some(Arc::new(HttpAuditSink::new(remote)?) as Arc<dyn AuditSink>),
            (None, None) => None,
        };
        let monitor = match (self.monitor, &config.monitor) {
            (Some(monitor), _) => Some(monitor),
            (None, Some(remote)) => {
                Some(Arc::new(HttpHostMonitor::new(remote)?) as Arc<dyn HostMonitor>)
            }
            (None, None) => None,
        };

        let root = self.cancel.unwrap_or_default();
        let tasks = TaskTracker::new();

        let cache = Arc::new(ResponseCache::new(&config.cache.to_cache_config()));
        let (refresh, worker) =
            TaskQueue::new(config.refresh.capacity, config.refresh.task_timeout());
        tasks.spawn(supervised(
            String::new(),
            "refresh_worker",
            worker.run(root.child_token()),
        ));

        let registry = ClusterRegistry::builder(Arc::clone(&inventory), factory, bootstrapper)
            .config(config.registry.clone())
            .preloader(Preloader::new(Arc::clone(&cache), &config.preload))
            .cancel_token(root.child_token())
            .build();

        if self.reconcile {
            let reconciler = Reconciler::new(
                registry.clone(),
                inventory,
                &config.registry,
                &config.reconcile,
            );
            tasks.spawn(supervised(
                String::new(),
                "reconcile",
                reconciler.run(root.child_token()),
            ));
        }

        let gate = Arc::new(ConcurrencyGate::new(config.gate.effective_permits()));
        let mut dispatcher = ResourceDispatcher::builder(
            registry.clone(),
            Arc::clone(&cache),
            refresh.clone(),
            auth,
        )
        .gate(gate)
        .cancel_token(root.child_token());
        if let Some(sink) = audit {
            dispatcher = dispatcher.audit(sink);
        }
        if let Some(monitor) = monitor {
            dispatcher = dispatcher.monitor(monitor);
        }

        info!(
            cluster_types = ?config.registry.cluster_types,
            reconcile = self.reconcile,
            "kubegate started"
        );

        Ok(Gateway {
            config,
            registry,
            cache,
            refresh,
            dispatcher: Arc::new(dispatcher.build()),
            root,
            tasks,
        })
    }
}
