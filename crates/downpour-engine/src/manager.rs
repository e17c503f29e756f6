//! Download manager.
//!
//! The orchestrator that owns the queue, the registry and the engine.
//! A single runner task drains the queue: it promotes tasks while slots
//! are free, spawns one attempt per promotion, and goes back to sleep on
//! a [`Notify`] until anything changes the picture (new task, finished
//! attempt, raised limit).

use crate::engine::{TransferEngine, TransferOutcome, TransferRequest};
use crate::registry::TransferRegistry;
use crate::scheduler::{FailureDisposition, TransferQueue};
use downpour_core::{DownloadTask, EventSink, ManagerConfig, TaskId, TransferResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, Notify};

/// Facade over the whole download subsystem.
#[derive(Debug)]
pub struct DownloadManager {
    registry: Arc<TransferRegistry>,
    engine: TransferEngine,
    queue: Mutex<TransferQueue>,
    queue_notify: Arc<Notify>,
    runner_started: AtomicBool,
}

impl DownloadManager {
    /// Create a manager emitting events into `sink`.
    #[must_use]
    pub fn new(config: ManagerConfig, sink: Arc<dyn EventSink>) -> Arc<Self> {
        let registry = Arc::new(TransferRegistry::new());
        let engine = TransferEngine::new(
            Arc::clone(&registry),
            Arc::clone(&sink),
            config.progress_interval,
        );
        Arc::new(Self {
            registry,
            engine,
            queue: Mutex::new(TransferQueue::new(&config)),
            queue_notify: Arc::new(Notify::new()),
            runner_started: AtomicBool::new(false),
        })
    }

    /// Enqueue a task and make sure the runner is draining the queue.
    ///
    /// The task's `received_bytes` is honored as a resume offset, so a
    /// task restored from persistence picks up where it left off.
    pub async fn start(self: &Arc<Self>, task: DownloadTask) -> TransferResult<()> {
        let id = task.id.clone();
        self.queue.lock().await.enqueue(task)?;
        tracing::info!(target: "downpour::manager", id = %id, "Task enqueued");

        self.ensure_runner();
        self.queue_notify.notify_one();
        Ok(())
    }

    /// Convenience form of [`Self::start`] building the task in place.
    /// `resume_offset` seeds the task's received bytes, 0 for a fresh
    /// download.
    pub async fn start_download(
        self: &Arc<Self>,
        id: TaskId,
        url: impl Into<String>,
        destination_path: impl Into<std::path::PathBuf>,
        resume_offset: u64,
    ) -> TransferResult<()> {
        let task = DownloadTask::new(id, url, destination_path).with_resume_offset(resume_offset);
        self.start(task).await
    }

    /// Pause the live transfer for `id`.
    ///
    /// Returns once the pause is requested; the `Paused` event arrives
    /// when the transfer loop has flushed and stopped.
    pub fn pause(&self, id: &TaskId) -> TransferResult<()> {
        self.registry.pause(id)?;
        tracing::info!(target: "downpour::manager", id = %id, "Pause requested");
        Ok(())
    }

    /// Requeue a paused or errored task; the next attempt resumes from
    /// the bytes already on disk.
    pub async fn resume(self: &Arc<Self>, id: &TaskId) -> TransferResult<()> {
        self.queue.lock().await.resume(id)?;
        tracing::info!(target: "downpour::manager", id = %id, "Task requeued");

        self.ensure_runner();
        self.queue_notify.notify_one();
        Ok(())
    }

    /// Manually retry a task after a terminal failure. Equivalent to
    /// [`Self::resume`]; retries never consult the automatic retry
    /// budget.
    pub async fn retry(self: &Arc<Self>, id: &TaskId) -> TransferResult<()> {
        self.resume(id).await
    }

    /// Forget a task: drop its control state, remove it from the queue
    /// and optionally delete its file. A live attempt is cancelled
    /// silently. Idempotent.
    pub async fn cleanup(&self, id: &TaskId, remove_file: bool) {
        self.registry.cleanup(id);
        let removed = self.queue.lock().await.remove(id);
        if remove_file {
            if let Some(task) = removed {
                let _ = tokio::fs::remove_file(&task.destination_path).await;
            }
        }
        tracing::info!(target: "downpour::manager", id = %id, "Task cleaned up");
    }

    /// Change the concurrency limit at runtime. Raising it promotes
    /// waiting tasks immediately; lowering it only affects future
    /// promotions.
    pub async fn set_concurrency_limit(&self, limit: u32) {
        self.queue.lock().await.set_concurrency_limit(limit);
        self.queue_notify.notify_one();
    }

    /// Snapshot of every known task.
    ///
    /// Statuses are current, but the byte counts and speed of a
    /// `Downloading` task reflect its last terminal or paused
    /// transition; live counts travel on the event stream, which is the
    /// only channel updated per chunk.
    pub async fn snapshot(&self) -> Vec<DownloadTask> {
        self.queue.lock().await.snapshot()
    }

    /// Look up a single task. Same freshness contract as
    /// [`Self::snapshot`].
    pub async fn task(&self, id: &TaskId) -> Option<DownloadTask> {
        self.queue.lock().await.task(id).cloned()
    }

    /// Number of tasks currently transferring.
    pub async fn active_count(&self) -> usize {
        self.queue.lock().await.downloading_count()
    }

    /// Number of tasks waiting for a slot.
    pub async fn pending_count(&self) -> usize {
        self.queue.lock().await.queued_count()
    }

    /// Start the runner task exactly once. The runner holds only a weak
    /// handle while idle, so dropping the last external handle tears the
    /// manager down and ends the runner on its next wake-up.
    fn ensure_runner(self: &Arc<Self>) {
        if self
            .runner_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tokio::spawn(Self::run_loop(
                Arc::downgrade(self),
                Arc::clone(&self.queue_notify),
            ));
        }
    }

    async fn run_loop(weak: Weak<Self>, notify: Arc<Notify>) {
        loop {
            let promoted = {
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                manager.queue.lock().await.promote()
            };
            if promoted.is_empty() {
                notify.notified().await;
                continue;
            }

            let Some(manager) = weak.upgrade() else {
                return;
            };
            for task in promoted {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    let request = TransferRequest {
                        id: task.id.clone(),
                        url: task.url,
                        destination: task.destination,
                        resume_offset: task.resume_offset,
                    };
                    let outcome = manager.engine.run(request).await;
                    manager.on_outcome(&task.id, outcome).await;
                    manager.queue_notify.notify_one();
                });
            }
        }
    }

    async fn on_outcome(self: &Arc<Self>, id: &TaskId, outcome: TransferOutcome) {
        match outcome {
            TransferOutcome::Completed {
                received_bytes,
                total_bytes,
            } => {
                self.queue
                    .lock()
                    .await
                    .on_completed(id, received_bytes, total_bytes);
            }
            TransferOutcome::Paused {
                received_bytes,
                total_bytes,
            } => {
                self.queue
                    .lock()
                    .await
                    .on_paused(id, received_bytes, total_bytes);
            }
            TransferOutcome::Failed { error, .. } => {
                let disposition = self.queue.lock().await.on_failed(id, &error);
                if let FailureDisposition::Requeue { delay } = disposition {
                    tracing::info!(
                        target: "downpour::manager",
                        id = %id,
                        ?delay,
                        "Scheduling automatic retry"
                    );
                    let manager = Arc::clone(self);
                    let id = id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if manager.queue.lock().await.resume(&id).is_ok() {
                            manager.queue_notify.notify_one();
                        }
                    });
                }
            }
            TransferOutcome::Detached => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use downpour_core::{NoopEventSink, TaskId, TransferError};

    fn manager() -> Arc<DownloadManager> {
        DownloadManager::new(ManagerConfig::default(), Arc::new(NoopEventSink))
    }

    #[tokio::test]
    async fn test_pause_unknown_task() {
        let manager = manager();
        let err = manager.pause(&TaskId::new("ghost")).unwrap_err();
        assert!(matches!(err, TransferError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_resume_unknown_task() {
        let manager = manager();
        let err = manager.resume(&TaskId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, TransferError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_starts_empty() {
        let manager = manager();
        assert!(manager.snapshot().await.is_empty());
        assert_eq!(manager.active_count().await, 0);
        assert_eq!(manager.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_unknown_task_is_noop() {
        let manager = manager();
        manager.cleanup(&TaskId::new("ghost"), true).await;
    }
}
