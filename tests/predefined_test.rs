//! Tests for installing the predefined RBAC payload.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use kubegate::config::BootstrapConfig;
use kubegate::registry::predefined::{ClientBootstrapper, ClusterClient, ObjectKind, PredefinedObject};
use kubegate::types::ClusterInfo;
use kubegate::{KubegateError, Resource, ResourceBootstrapper, Result};

mod common;
use common::cluster;

type Key = (ObjectKind, String, String);

/// In-memory cluster. The namespace turns `Active` after `activate_after` reads.
#[derive(Default)]
struct FakeClient {
    objects: Mutex<HashMap<Key, Resource>>,
    log: Mutex<Vec<String>>,
    namespace_reads: AtomicU32,
    activate_after: u32,
    fail_create: Mutex<Option<ObjectKind>>,
}

impl FakeClient {
    fn activating_after(reads: u32) -> Self {
        Self {
            activate_after: reads,
            ..Default::default()
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn contains(&self, kind: ObjectKind, namespace: &str, name: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(kind, namespace.to_string(), name.to_string()))
    }

    fn preexisting(self, kind: ObjectKind, namespace: &str, name: &str) -> Self {
        self.objects.lock().unwrap().insert(
            (kind, namespace.to_string(), name.to_string()),
            Resource::new(json!({"metadata": {"name": name}})),
        );
        self
    }

    fn phase(&self) -> &'static str {
        if self.namespace_reads.load(Ordering::SeqCst) >= self.activate_after {
            "Active"
        } else {
            "Pending"
        }
    }
}

#[async_trait]
impl ClusterClient for FakeClient {
    async fn create(&self, _cluster: &ClusterInfo, object: &PredefinedObject) -> Result<Resource> {
        self.log
            .lock()
            .unwrap()
            .push(format!("create {} {}", object.kind, object.name));
        if *self.fail_create.lock().unwrap() == Some(object.kind) {
            return Err(KubegateError::Http("apiserver unavailable".into()));
        }
        let key = (object.kind, object.namespace.clone(), object.name.clone());
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(KubegateError::Conflict(format!("{} exists", object.name)));
        }
        let mut body = object.body.clone();
        if object.kind == ObjectKind::Namespace {
            body["status"] = json!({"phase": self.phase()});
        }
        let created = Resource::new(body);
        objects.insert(key, created.clone());
        Ok(created)
    }

    async fn get(
        &self,
        _cluster: &ClusterInfo,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource> {
        if kind == ObjectKind::Namespace {
            self.namespace_reads.fetch_add(1, Ordering::SeqCst);
            return Ok(Resource::new(json!({
                "metadata": {"name": name},
                "status": {"phase": self.phase()},
            })));
        }
        self.objects
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| KubegateError::NotFound(name.to_string()))
    }

    async fn delete(
        &self,
        _cluster: &ClusterInfo,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        self.log.lock().unwrap().push(format!("delete {kind} {name}"));
        self.objects
            .lock()
            .unwrap()
            .remove(&(kind, namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| KubegateError::NotFound(name.to_string()))
    }
}

fn bootstrapper(client: &Arc<FakeClient>, wait_attempts: u32) -> ClientBootstrapper<FakeClient> {
    let config = BootstrapConfig {
        namespace: "kubegate-system".into(),
        namespace_wait_attempts: wait_attempts,
    };
    ClientBootstrapper::new(Arc::clone(client), &config, CancellationToken::new())
        .poll_interval(Duration::from_millis(1))
}

// ============================================================================
// Namespace
// ============================================================================

#[tokio::test]
async fn active_namespace_on_create_skips_polling() {
    let client = Arc::new(FakeClient::activating_after(0));
    bootstrapper(&client, 3)
        .ensure_predefined_resources(&cluster("c1"))
        .await
        .unwrap();

    assert_eq!(client.namespace_reads.load(Ordering::SeqCst), 0);
    assert!(client.contains(ObjectKind::Namespace, "", "kubegate-system"));
}

#[tokio::test]
async fn waits_for_namespace_to_become_active() {
    let client = Arc::new(FakeClient::activating_after(3));
    bootstrapper(&client, 5)
        .ensure_predefined_resources(&cluster("c1"))
        .await
        .unwrap();

    assert_eq!(client.namespace_reads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn existing_namespace_is_accepted() {
    let client = Arc::new(
        FakeClient::activating_after(1).preexisting(ObjectKind::Namespace, "", "kubegate-system"),
    );
    bootstrapper(&client, 3)
        .ensure_predefined_resources(&cluster("c1"))
        .await
        .unwrap();

    // Never deleted, only re-read.
    assert!(!client.log().iter().any(|op| op.starts_with("delete Namespace")));
    assert_eq!(client.namespace_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn inactive_namespace_times_out() {
    let client = Arc::new(FakeClient::activating_after(u32::MAX));
    let err = bootstrapper(&client, 4)
        .ensure_predefined_resources(&cluster("c1"))
        .await
        .unwrap_err();

    assert!(matches!(err, KubegateError::Internal(_)));
    assert_eq!(
        err.to_string(),
        "internal error: system namespace kubegate-system is not active after 4 attempts"
    );
    assert_eq!(client.namespace_reads.load(Ordering::SeqCst), 4);
    // Nothing else was applied.
    assert_eq!(client.log().len(), 1);
}

#[tokio::test]
async fn cancellation_stops_the_wait() {
    let client = Arc::new(FakeClient::activating_after(u32::MAX));
    let cancel = CancellationToken::new();
    let config = BootstrapConfig::default();
    let bootstrapper = ClientBootstrapper::new(Arc::clone(&client), &config, cancel.clone())
        .poll_interval(Duration::from_secs(60));

    let handle = tokio::spawn(async move {
        bootstrapper
            .ensure_predefined_resources(&cluster("c1"))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("bootstrap should stop on cancel")
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("cancelled"));
}

// ============================================================================
// Objects
// ============================================================================

#[tokio::test]
async fn objects_are_recreated_in_order() {
    let client = Arc::new(
        FakeClient::activating_after(0).preexisting(
            ObjectKind::ClusterRole,
            "",
            "kubegate-org-manager",
        ),
    );
    bootstrapper(&client, 3)
        .ensure_predefined_resources(&cluster("c1"))
        .await
        .unwrap();

    assert_eq!(
        client.log(),
        vec![
            "create Namespace kubegate-system",
            "delete ServiceAccount kubegate-org-manager",
            "create ServiceAccount kubegate-org-manager",
            "delete ServiceAccount kubegate-org-support",
            "create ServiceAccount kubegate-org-support",
            "delete ClusterRole kubegate-org-manager",
            "create ClusterRole kubegate-org-manager",
            "delete ClusterRole kubegate-org-support",
            "create ClusterRole kubegate-org-support",
            "delete ClusterRoleBinding kubegate-org-manager",
            "create ClusterRoleBinding kubegate-org-manager",
            "delete ClusterRoleBinding kubegate-org-support",
            "create ClusterRoleBinding kubegate-org-support",
        ]
    );
    assert!(client.contains(ObjectKind::ServiceAccount, "kubegate-system", "kubegate-org-support"));
    assert!(client.contains(ObjectKind::ClusterRoleBinding, "", "kubegate-org-manager"));
}

#[tokio::test]
async fn create_failure_aborts_bootstrap() {
    let client = Arc::new(FakeClient::activating_after(0));
    *client.fail_create.lock().unwrap() = Some(ObjectKind::ClusterRole);

    let err = bootstrapper(&client, 3)
        .ensure_predefined_resources(&cluster("c1"))
        .await
        .unwrap_err();

    assert!(matches!(err, KubegateError::Http(_)));
    assert!(!client.contains(ObjectKind::ClusterRoleBinding, "", "kubegate-org-manager"));
}

#[tokio::test]
async fn bootstrap_is_repeatable() {
    let client = Arc::new(FakeClient::activating_after(0));
    let b = bootstrapper(&client, 3);
    b.ensure_predefined_resources(&cluster("c1")).await.unwrap();
    b.ensure_predefined_resources(&cluster("c1")).await.unwrap();

    assert!(client.contains(ObjectKind::ClusterRole, "", "kubegate-org-support"));
}
