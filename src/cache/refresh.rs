//! Deduplicated background refresh.
//!
//! [`TaskQueue`] is a bounded queue that holds at most one pending task per
//! [`Fingerprint`]. A task stays pending from enqueue until the worker has
//! finished executing it, so soft-TTL hits that race a running refresh do
//! not schedule a second one.
//!
//! Refresh is best-effort: a full queue or an already-pending key drops the
//! new task, and failed tasks are logged but never retried. The next
//! stale hit re-enqueues naturally.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Fingerprint;
use crate::Result;
use crate::telemetry;

/// One unit of refresh work for a cache line.
pub struct RefreshTask {
    key: Fingerprint,
    work: BoxFuture<'static, Result<()>>,
}

impl RefreshTask {
    pub fn new<F>(key: Fingerprint, work: F) -> Self
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            key,
            work: Box::pin(work),
        }
    }

    pub fn key(&self) -> Fingerprint {
        self.key
    }
}

impl std::fmt::Debug for RefreshTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTask").field("key", &self.key).finish()
    }
}

/// Outcome of [`TaskQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// A task for the same key is already pending.
    Duplicate,
    /// The backlog is full.
    Full,
    /// The worker has stopped.
    Closed,
}

impl Enqueue {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Duplicate => "duplicate",
            Self::Full => "full",
            Self::Closed => "closed",
        }
    }
}

type PendingSet = Arc<Mutex<HashSet<Fingerprint>>>;

fn lock(pending: &PendingSet) -> MutexGuard<'_, HashSet<Fingerprint>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side of the refresh queue. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<RefreshTask>,
    pending: PendingSet,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` tasks, and the worker that
    /// drains it. Each task gets `task_timeout` to complete.
    pub fn new(capacity: usize, task_timeout: Duration) -> (Self, RefreshWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending = PendingSet::default();
        let queue = Self {
            tx,
            pending: Arc::clone(&pending),
        };
        let worker = RefreshWorker {
            rx,
            pending,
            task_timeout,
        };
        (queue, worker)
    }

    /// Offer a task. Never blocks.
    pub fn enqueue(&self, task: RefreshTask) -> Enqueue {
        let key = task.key;
        let outcome = {
            let mut pending = lock(&self.pending);
            if !pending.insert(key) {
                Enqueue::Duplicate
            } else {
                match self.tx.try_send(task) {
                    Ok(()) => Enqueue::Queued,
                    Err(err) => {
                        pending.remove(&key);
                        match err {
                            TrySendError::Full(_) => Enqueue::Full,
                            TrySendError::Closed(_) => Enqueue::Closed,
                        }
                    }
                }
            }
        };

        match outcome {
            Enqueue::Queued => debug!(key = %key, "refresh task queued"),
            Enqueue::Duplicate => debug!(key = %key, "refresh task already pending"),
            Enqueue::Full => warn!(key = %key, "refresh queue full, dropping task"),
            Enqueue::Closed => warn!(key = %key, "refresh worker stopped, dropping task"),
        }
        metrics::counter!(telemetry::REFRESH_TASKS_TOTAL, "outcome" => outcome.as_str())
            .increment(1);
        outcome
    }

    /// Whether a task for `key` is queued or running.
    pub fn is_pending(&self, key: &Fingerprint) -> bool {
        lock(&self.pending).contains(key)
    }

    /// Number of keys queued or running.
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// Consumer side of the refresh queue. Executes tasks one at a time.
pub struct RefreshWorker {
    rx: mpsc::Receiver<RefreshTask>,
    pending: PendingSet,
    task_timeout: Duration,
}

impl RefreshWorker {
    /// Drain the queue until `cancel` fires or every [`TaskQueue`] is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let task = tokio::select! {
                _ = cancel.cancelled() => break,
                task = self.rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            self.execute(task).await;
        }
        debug!("refresh worker stopped");
    }

    async fn execute(&self, task: RefreshTask) {
        let RefreshTask { key, work } = task;
        let result = tokio::time::timeout(self.task_timeout, AssertUnwindSafe(work).catch_unwind())
            .await;

        let outcome = match result {
            Ok(Ok(Ok(()))) => "ok",
            Ok(Ok(Err(e))) => {
                warn!(key = %key, error = %e, "refresh task failed");
                "error"
            }
            Ok(Err(_)) => {
                warn!(key = %key, "refresh task panicked");
                "error"
            }
            Err(_) => {
                warn!(
                    key = %key,
                    timeout_ms = self.task_timeout.as_millis() as u64,
                    "refresh task timed out"
                );
                "timeout"
            }
        };
        lock(&self.pending).remove(&key);
        metrics::counter!(telemetry::REFRESH_TASKS_TOTAL, "outcome" => outcome).increment(1);
    }
}
