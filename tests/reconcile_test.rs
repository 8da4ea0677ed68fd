//! Tests for inventory reconciliation.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use kubegate::config::{ReconcileConfig, RegistryConfig};
use kubegate::registry::Reconciler;
use kubegate::types::ClusterType;
use tokio_util::sync::CancellationToken;

mod common;
use common::{Harness, HarnessOptions, cluster, eventually};

fn reconciler(h: &Harness) -> Reconciler {
    Reconciler::new(
        h.registry.clone(),
        h.inventory.clone(),
        &RegistryConfig::default(),
        &ReconcileConfig { interval_secs: 1 },
    )
}

#[tokio::test]
async fn tick_adds_eligible_clusters() {
    let h = Harness::with(HarnessOptions {
        clusters: vec![cluster("a"), cluster("b"), cluster("bare").without_manage_config()],
        ..Default::default()
    });

    let report = reconciler(&h).tick().await.unwrap();

    assert_eq!(report.added, vec!["a", "b"]);
    assert!(report.removed.is_empty());
    assert_eq!(report.skipped, vec!["bare"]);
    assert!(!h.registry.contains("bare"));

    let registry = h.registry.clone();
    assert!(eventually(|| registry.is_ready("a") && registry.is_ready("b")).await);
}

#[tokio::test]
async fn tick_is_idempotent() {
    let h = Harness::with(HarnessOptions {
        clusters: vec![cluster("a"), cluster("b")],
        ..Default::default()
    });
    let r = reconciler(&h);

    r.tick().await.unwrap();
    let registry = h.registry.clone();
    assert!(eventually(|| registry.is_ready("a") && registry.is_ready("b")).await);

    let second = r.tick().await.unwrap();
    assert!(second.is_noop());
    assert_eq!(h.bootstrapper.runs(), 2);
    assert_eq!(h.factory.creates(), 2);
}

#[tokio::test]
async fn tick_removes_vanished_clusters() {
    let h = Harness::with(HarnessOptions {
        clusters: vec![cluster("a"), cluster("b")],
        ..Default::default()
    });
    let r = reconciler(&h);
    r.tick().await.unwrap();
    let registry = h.registry.clone();
    assert!(eventually(|| registry.is_ready("b")).await);
    let b = h.factory.server("b");

    h.inventory.set(vec![cluster("a")]);
    let report = r.tick().await.unwrap();

    assert_eq!(report.removed, vec!["b"]);
    assert!(!h.registry.contains("b"));
    assert!(b.is_cancelled());
    assert!(h.registry.contains("a"));
}

#[tokio::test]
async fn losing_manage_config_removes_cluster() {
    let h = Harness::with(HarnessOptions {
        clusters: vec![cluster("a")],
        ..Default::default()
    });
    let r = reconciler(&h);
    r.tick().await.unwrap();

    h.inventory.set(vec![cluster("a").without_manage_config()]);
    let report = r.tick().await.unwrap();

    assert_eq!(report.removed, vec!["a"]);
    assert_eq!(report.skipped, vec!["a"]);
    assert!(!h.registry.contains("a"));
}

#[tokio::test]
async fn inventory_error_aborts_the_tick() {
    let h = Harness::with(HarnessOptions {
        clusters: vec![cluster("a")],
        ..Default::default()
    });
    let r = reconciler(&h);
    r.tick().await.unwrap();

    h.inventory.set(Vec::new());
    h.inventory.fail.store(true, Ordering::SeqCst);
    assert!(r.tick().await.is_err());

    // Nothing was removed on the failed round.
    assert!(h.registry.contains("a"));
}

#[tokio::test]
async fn lists_every_served_type() {
    let mut edas = cluster("e");
    edas.cluster_type = ClusterType::Edas;
    let h = Harness::with(HarnessOptions {
        clusters: vec![cluster("k"), edas],
        ..Default::default()
    });

    let report = reconciler(&h).tick().await.unwrap();
    assert_eq!(report.added, vec!["e", "k"]);
    assert_eq!(h.inventory.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn run_ticks_immediately_and_stops_on_cancel() {
    let h = Harness::with(HarnessOptions {
        clusters: vec![cluster("a")],
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(reconciler(&h).run(cancel.clone()));

    let registry = h.registry.clone();
    assert!(eventually(|| registry.is_ready("a")).await);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("reconciler should stop")
        .unwrap();

    let inventory = Arc::clone(&h.inventory);
    assert!(inventory.list_calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn tick_releases_idle_clusters_before_diffing() {
    let h = Harness::with(HarnessOptions {
        registry: RegistryConfig {
            idle_ttl_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    });
    h.ready("c1").await;
    let idle = h.registry.lookup("c1").unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;
    let report = reconciler(&h).tick().await.unwrap();

    // The idle server is cancelled and the still-listed cluster comes back fresh.
    assert!(idle.cancel_handle().unwrap().is_cancelled());
    assert_eq!(report.added, vec!["c1"]);
    let registry = h.registry.clone();
    assert!(eventually(|| registry.is_ready("c1")).await);
    assert_eq!(h.factory.creates(), 2);
}
