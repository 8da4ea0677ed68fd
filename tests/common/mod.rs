//! Shared test doubles for kubegate integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use kubegate::cache::{RefreshWorker, ResponseCache, TaskQueue};
use kubegate::config::RegistryConfig;
use kubegate::registry::{ClusterRegistry, Preloader};
use kubegate::traits::{
    AuditSink, Authenticator, ClusterInventory, ClusterServer, ClusterServerFactory, HostMonitor,
    ResourceBootstrapper,
};
use kubegate::types::{
    ApiOp, ApiResponse, AuditEvent, ClusterInfo, ClusterType, Method, OfflineHostsRequest,
    Resource, Schema, SchemaSet, UserInfo,
};
use kubegate::{CacheConfig, ConcurrencyGate, KubegateError, ResourceDispatcher, Result};

// ============================================================================
// Fixtures
// ============================================================================

pub fn cluster(name: &str) -> ClusterInfo {
    ClusterInfo::new(name, ClusterType::K8s, format!("https://{name}.example:6443"))
}

pub fn pod(name: &str, namespace: &str, node: &str) -> Resource {
    Resource::new(json!({
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"nodeName": node}
    }))
}

pub fn node(name: &str) -> Resource {
    Resource::new(json!({"metadata": {"name": name}, "spec": {}}))
}

/// Poll until `cond` holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

// ============================================================================
// Cluster server
// ============================================================================

pub struct MockServer {
    name: String,
    objects: Mutex<HashMap<String, Vec<Resource>>>,
    ops: Mutex<Vec<ApiOp>>,
    pub list_calls: AtomicU32,
    pub handle_calls: AtomicU32,
    active_lists: AtomicU32,
    pub peak_lists: AtomicU32,
    pub deny_list: AtomicBool,
    pub fail_lists: AtomicBool,
    /// Lists left to answer with a `NotFound` error payload.
    pub missing_lists: AtomicU32,
    pub fail_evictions: AtomicBool,
    pub token: Mutex<Option<CancellationToken>>,
    list_delay: Mutex<Duration>,
}

impl MockServer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            objects: Mutex::new(HashMap::new()),
            ops: Mutex::new(Vec::new()),
            list_calls: AtomicU32::new(0),
            handle_calls: AtomicU32::new(0),
            active_lists: AtomicU32::new(0),
            peak_lists: AtomicU32::new(0),
            deny_list: AtomicBool::new(false),
            fail_lists: AtomicBool::new(false),
            missing_lists: AtomicU32::new(0),
            fail_evictions: AtomicBool::new(false),
            token: Mutex::new(None),
            list_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn seed(&self, kind: &str, items: Vec<Resource>) {
        self.objects.lock().unwrap().insert(kind.to_string(), items);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn lists(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> Vec<ApiOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn ops_with(&self, method: Method) -> Vec<ApiOp> {
        self.ops()
            .into_iter()
            .filter(|op| op.method == method)
            .collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn error(code: &str, message: &str) -> ApiResponse {
        ApiResponse::Object(Resource::new(json!({
            "type": "error",
            "code": code,
            "message": message
        })))
    }
}

#[async_trait]
impl ClusterServer for MockServer {
    fn cluster_name(&self) -> &str {
        &self.name
    }

    async fn set_schemas(&self, op: &mut ApiOp) -> Result<()> {
        let schemas: SchemaSet = [
            Schema::new("pods", "", true),
            Schema::new("nodes", "", false),
            Schema::new("apps.deployments", "apps", true),
        ]
        .into_iter()
        .collect();
        op.schemas = Some(schemas);
        Ok(())
    }

    fn grants(&self, _user: &UserInfo, verb: &str, _schema: &Schema, _namespace: &str) -> bool {
        !(verb == "list" && self.deny_list.load(Ordering::SeqCst))
    }

    async fn handle(&self, op: &ApiOp) -> Result<ApiResponse> {
        self.handle_calls.fetch_add(1, Ordering::SeqCst);
        self.ops.lock().unwrap().push(op.clone());

        match op.method {
            Method::List => {
                self.list_calls.fetch_add(1, Ordering::SeqCst);
                let active = self.active_lists.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_lists.fetch_max(active, Ordering::SeqCst);
                let delay = *self.list_delay.lock().unwrap();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.active_lists.fetch_sub(1, Ordering::SeqCst);
                if self.fail_lists.load(Ordering::SeqCst) {
                    return Err(KubegateError::Internal("list failed".to_string()));
                }
                if self
                    .missing_lists
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Ok(Self::error(
                        "NotFound",
                        &format!("the server could not find the requested resource ({})", op.kind),
                    ));
                }
                let objects = self.objects.lock().unwrap();
                let items = objects
                    .get(&op.kind)
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|r| op.namespace.is_empty() || r.namespace() == Some(op.namespace.as_str()))
                    .collect();
                Ok(ApiResponse::Collection(items))
            }
            Method::Get => {
                let objects = self.objects.lock().unwrap();
                let found = objects.get(&op.kind).and_then(|items| {
                    items
                        .iter()
                        .find(|r| r.name() == Some(op.name.as_str()))
                        .cloned()
                });
                Ok(match found {
                    Some(obj) => ApiResponse::Object(obj),
                    None => Self::error("NotFound", &format!("{} {:?} not found", op.kind, op.name)),
                })
            }
            Method::Create if op.subresource.as_deref() == Some("eviction") => {
                if self.fail_evictions.load(Ordering::SeqCst) {
                    return Ok(Self::error("TooManyRequests", "disruption budget"));
                }
                Ok(ApiResponse::Object(Resource::new(json!({"status": "Success"}))))
            }
            Method::Create | Method::Update | Method::Patch => {
                let body = op.body.clone().unwrap_or(Value::Null);
                if body.pointer("/metadata/name").and_then(Value::as_str) == Some("exists") {
                    return Ok(Self::error("AlreadyExists", "object already exists"));
                }
                Ok(ApiResponse::Object(Resource::new(body)))
            }
            Method::Delete => Ok(ApiResponse::Empty),
        }
    }

    async fn serve_http(&self, req: http::Request<Bytes>) -> http::Response<Bytes> {
        let body = json!({
            "cluster": self.name,
            "path": req.uri().to_string(),
            "method": req.method().as_str(),
        });
        http::Response::new(Bytes::from(body.to_string()))
    }
}

// ============================================================================
// Server factory
// ============================================================================

#[derive(Default)]
pub struct MockFactory {
    servers: Mutex<HashMap<String, Arc<MockServer>>>,
    pub create_calls: AtomicU32,
    pub fail: AtomicBool,
}

impl MockFactory {
    /// The server that is (or will be) handed out for `cluster`.
    pub fn server(&self, cluster: &str) -> Arc<MockServer> {
        Arc::clone(
            self.servers
                .lock()
                .unwrap()
                .entry(cluster.to_string())
                .or_insert_with(|| Arc::new(MockServer::new(cluster))),
        )
    }

    pub fn creates(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterServerFactory for MockFactory {
    async fn create(
        &self,
        cluster: &ClusterInfo,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn ClusterServer>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(KubegateError::Internal("factory failed".to_string()));
        }
        let server = self.server(&cluster.name);
        *server.token.lock().unwrap() = Some(cancel);
        Ok(server)
    }
}

// ============================================================================
// Inventory
// ============================================================================

#[derive(Default)]
pub struct MockInventory {
    clusters: Mutex<Vec<ClusterInfo>>,
    pub list_calls: AtomicU32,
    pub fail: AtomicBool,
}

impl MockInventory {
    pub fn with(clusters: Vec<ClusterInfo>) -> Self {
        let inventory = Self::default();
        inventory.set(clusters);
        inventory
    }

    pub fn set(&self, clusters: Vec<ClusterInfo>) {
        *self.clusters.lock().unwrap() = clusters;
    }
}

#[async_trait]
impl ClusterInventory for MockInventory {
    async fn list_clusters(&self, cluster_type: &ClusterType) -> Result<Vec<ClusterInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(KubegateError::Internal("inventory unavailable".to_string()));
        }
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.cluster_type == cluster_type)
            .cloned()
            .collect())
    }

    async fn get_cluster(&self, name: &str) -> Result<ClusterInfo> {
        self.clusters
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| KubegateError::NotFound(format!("cluster {name}")))
    }
}

// ============================================================================
// Bootstrapper
// ============================================================================

/// Counts bootstrap runs. Optionally holds every run until released.
pub struct MockBootstrapper {
    pub calls: AtomicU32,
    pub fail: AtomicBool,
    hold: AtomicBool,
    release: Notify,
}

impl Default for MockBootstrapper {
    fn default() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            release: Notify::new(),
        }
    }
}

impl MockBootstrapper {
    pub fn held() -> Self {
        let b = Self::default();
        b.hold();
        b
    }

    /// Hold every bootstrap started from now on.
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub fn runs(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceBootstrapper for MockBootstrapper {
    async fn ensure_predefined_resources(&self, _cluster: &ClusterInfo) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        while self.hold.load(Ordering::SeqCst) {
            let notified = self.release.notified();
            if !self.hold.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(KubegateError::Internal("bootstrap failed".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Auth, audit, monitor
// ============================================================================

#[derive(Default)]
pub struct MockAuth {
    pub calls: AtomicU32,
    pub deny: AtomicBool,
}

impl MockAuth {
    pub fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for MockAuth {
    async fn authenticate(&self, user_id: &str, _org_id: &str, _cluster: &str) -> Result<UserInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if user_id.is_empty() {
            return Err(KubegateError::NotLogin);
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(KubegateError::access_denied());
        }
        Ok(UserInfo::new(format!("kubegate-user-{user_id}")).with_group("kubegate:org-manager"))
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    pub events: Mutex<Vec<AuditEvent>>,
    pub fail: AtomicBool,
}

impl RecordingAudit {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(KubegateError::Http("audit service down".to_string()));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Records offline notifications; fails the first `failures` calls.
#[derive(Default)]
pub struct RecordingMonitor {
    pub requests: Mutex<Vec<OfflineHostsRequest>>,
    pub calls: AtomicU32,
    pub failures: AtomicU32,
}

#[async_trait]
impl HostMonitor for RecordingMonitor {
    async fn offline_hosts(&self, request: &OfflineHostsRequest) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures.load(Ordering::SeqCst) {
            return Err(KubegateError::Http("monitor unavailable".to_string()));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Registry, cache, refresh queue and dispatcher wired to mocks.
pub struct Harness {
    pub inventory: Arc<MockInventory>,
    pub factory: Arc<MockFactory>,
    pub bootstrapper: Arc<MockBootstrapper>,
    pub auth: Arc<MockAuth>,
    pub audit: Arc<RecordingAudit>,
    pub monitor: Arc<RecordingMonitor>,
    pub registry: ClusterRegistry,
    pub cache: Arc<ResponseCache>,
    pub queue: TaskQueue,
    pub dispatcher: Arc<ResourceDispatcher>,
    pub cancel: CancellationToken,
}

pub struct HarnessOptions {
    pub clusters: Vec<ClusterInfo>,
    pub cache: CacheConfig,
    pub preload: bool,
    pub bootstrapper: MockBootstrapper,
    pub start_worker: bool,
    pub gate_permits: usize,
    pub registry: RegistryConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            clusters: vec![cluster("c1")],
            cache: CacheConfig::default(),
            preload: false,
            bootstrapper: MockBootstrapper::default(),
            start_worker: true,
            gate_permits: 10,
            registry: RegistryConfig::default(),
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with(HarnessOptions::default())
    }

    pub fn with(options: HarnessOptions) -> Self {
        let (harness, worker) = Self::build(options);
        if let Some(worker) = worker {
            tokio::spawn(worker.run(harness.cancel.clone()));
        }
        harness
    }

    /// Build without spawning the refresh worker; the caller owns it.
    pub fn build(options: HarnessOptions) -> (Self, Option<RefreshWorker>) {
        let inventory = Arc::new(MockInventory::with(options.clusters));
        let factory = Arc::new(MockFactory::default());
        let bootstrapper = Arc::new(options.bootstrapper);
        let auth = Arc::new(MockAuth::default());
        let audit = Arc::new(RecordingAudit::default());
        let monitor = Arc::new(RecordingMonitor::default());
        let cancel = CancellationToken::new();

        let cache = Arc::new(ResponseCache::new(&options.cache));
        let (queue, worker) = TaskQueue::new(64, Duration::from_secs(10));

        let mut builder = ClusterRegistry::builder(
            inventory.clone(),
            factory.clone(),
            bootstrapper.clone(),
        )
        .config(options.registry)
        .cancel_token(cancel.child_token());
        if options.preload {
            builder = builder.preloader(Preloader::new(
                Arc::clone(&cache),
                &kubegate::config::PreloadConfig {
                    kinds: vec!["nodes".to_string(), "pods".to_string()],
                    max_attempts: 3,
                    backoff_secs: 0,
                },
            ));
        }
        let registry = builder.build();

        let dispatcher = ResourceDispatcher::builder(
            registry.clone(),
            Arc::clone(&cache),
            queue.clone(),
            auth.clone(),
        )
        .gate(Arc::new(ConcurrencyGate::new(options.gate_permits)))
        .audit(audit.clone())
        .monitor(monitor.clone())
        .monitor_retry(kubegate::RetryConfig::fixed(5, Duration::from_millis(1)))
        .cancel_token(cancel.child_token())
        .build();

        let worker = options.start_worker.then_some(worker);
        (
            Self {
                inventory,
                factory,
                bootstrapper,
                auth,
                audit,
                monitor,
                registry,
                cache,
                queue,
                dispatcher: Arc::new(dispatcher),
                cancel,
            },
            worker,
        )
    }

    /// Register `name` and wait until it is ready.
    pub async fn ready(&self, name: &str) -> Arc<MockServer> {
        let server = self.factory.server(name);
        let _ = self.registry.get(name).await;
        let registry = self.registry.clone();
        let name_owned = name.to_string();
        assert!(
            eventually(|| registry.is_ready(&name_owned)).await,
            "cluster {name} never became ready"
        );
        server
    }
}
