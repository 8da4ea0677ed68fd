//! Registry entries and the cancel handles they own.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::traits::ClusterServer;

/// Run `fut`, logging instead of propagating a panic.
pub(crate) async fn supervised<F>(cluster: String, task: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        error!(cluster = %cluster, task, "background task panicked");
    }
}

/// Owns the background work started for one ready cluster.
///
/// Cancelling stops the cluster server's own work (it was created with
/// [`token()`](Self::token)) and every task spawned through
/// [`spawn()`](Self::spawn).
pub struct CancelHandle {
    cluster: String,
    token: CancellationToken,
    tracker: TaskTracker,
    cancelled: AtomicBool,
}

impl CancelHandle {
    pub fn new(cluster: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            cluster: cluster.into(),
            token,
            tracker: TaskTracker::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawn a supervised task tied to this cluster. No-op once cancelled.
    pub fn spawn<F>(&self, task: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_cancelled() {
            debug!(cluster = %self.cluster, task, "cluster cancelled, not spawning");
            return;
        }
        self.tracker.spawn(supervised(self.cluster.clone(), task, fut));
    }

    /// Cancel the cluster's work. Returns `true` only for the call that
    /// actually cancelled.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        self.tracker.close();
        debug!(cluster = %self.cluster, "cluster cancelled");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Number of spawned tasks still running.
    pub fn running_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every spawned task to finish. Returns immediately unless
    /// [`cancel()`](Self::cancel) has been called.
    pub async fn wait(&self) {
        if self.is_cancelled() {
            self.tracker.wait().await;
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cluster", &self.cluster)
            .field("cancelled", &self.is_cancelled())
            .field("running_tasks", &self.tracker.len())
            .finish()
    }
}

enum EntryState {
    Bootstrapping,
    Ready {
        server: Arc<dyn ClusterServer>,
        cancel: CancelHandle,
    },
}

/// One cluster's dispatch state.
///
/// An entry is either bootstrapping (no server, no cancel handle) or ready
/// (both). There is no way to build a ready entry missing either one.
pub struct ClusterEntry {
    name: String,
    state: EntryState,
}

impl ClusterEntry {
    pub(crate) fn bootstrapping(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: EntryState::Bootstrapping,
        }
    }

    pub(crate) fn ready(
        name: impl Into<String>,
        server: Arc<dyn ClusterServer>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            name: name.into(),
            state: EntryState::Ready { server, cancel },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, EntryState::Ready { .. })
    }

    pub fn server(&self) -> Option<&Arc<dyn ClusterServer>> {
        match &self.state {
            EntryState::Ready { server, .. } => Some(server),
            EntryState::Bootstrapping => None,
        }
    }

    pub fn cancel_handle(&self) -> Option<&CancelHandle> {
        match &self.state {
            EntryState::Ready { cancel, .. } => Some(cancel),
            EntryState::Bootstrapping => None,
        }
    }

    /// Cancel the entry's background work, if any. Returns `true` when this
    /// call performed the cancellation.
    pub(crate) fn release(&self) -> bool {
        self.cancel_handle().is_some_and(CancelHandle::cancel)
    }
}

impl fmt::Debug for ClusterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterEntry")
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .field("cancel", &self.cancel_handle())
            .finish()
    }
}
