//! Per-cluster bootstrap sequence.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::entry::{CancelHandle, ClusterEntry};
use super::Inner;
use crate::telemetry;
use crate::types::ClusterInfo;

fn record(status: &'static str) {
    metrics::counter!(telemetry::BOOTSTRAPS_TOTAL, "status" => status).increment(1);
}

/// Bring `cluster` from bootstrapping to ready.
///
/// Any failure removes the placeholder so that the next request or
/// reconciliation tick starts over. Nothing here touches an entry other
/// than `placeholder`: if it was removed or replaced while we were
/// working, the new server is released and discarded.
pub(super) async fn run(inner: Arc<Inner>, cluster: ClusterInfo, placeholder: Arc<ClusterEntry>) {
    let name = cluster.name.clone();

    info!(cluster = %name, "creating predefined resources");
    let ensured = tokio::select! {
        _ = inner.root.cancelled() => {
            debug!(cluster = %name, "bootstrap cancelled");
            return;
        }
        result = inner.bootstrapper.ensure_predefined_resources(&cluster) => result,
    };
    if let Err(e) = ensured {
        warn!(
            cluster = %name,
            error = %e,
            "failed to create predefined resources, skip starting cluster server"
        );
        inner.discard(&name, &placeholder);
        record("error");
        return;
    }

    info!(cluster = %name, "starting cluster server");
    let token = inner.root.child_token();
    let created = tokio::select! {
        _ = inner.root.cancelled() => {
            debug!(cluster = %name, "bootstrap cancelled");
            token.cancel();
            return;
        }
        result = inner.factory.create(&cluster, token.clone()) => result,
    };
    let server = match created {
        Ok(server) => server,
        Err(e) => {
            error!(cluster = %name, error = %e, "failed to create cluster server");
            token.cancel();
            inner.discard(&name, &placeholder);
            record("error");
            return;
        }
    };

    let ready = Arc::new(ClusterEntry::ready(
        name.clone(),
        Arc::clone(&server),
        CancelHandle::new(name.clone(), token),
    ));
    if !inner.promote(&name, &placeholder, Arc::clone(&ready)) {
        info!(cluster = %name, "cluster was removed during bootstrap, discarding server");
        ready.release();
        record("discarded");
        return;
    }
    info!(cluster = %name, "cluster server started");
    record("ok");

    if let (Some(preloader), Some(cancel)) = (&inner.preloader, ready.cancel_handle()) {
        for kind in preloader.kinds() {
            let preloader = preloader.clone();
            let server = Arc::clone(&server);
            let kind = kind.clone();
            let token = cancel.token().clone();
            cancel.spawn("preload", async move {
                preloader.run(server, kind, token).await;
            });
        }
    }
}
