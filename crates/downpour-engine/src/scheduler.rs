//! Queue scheduler state machine.
//!
//! Pure, synchronous state with no I/O and no locking of its own. The
//! manager wraps it in a mutex and is responsible for calling
//! [`TransferQueue::promote`] whenever a slot may have opened.
//!
//! Invariant: the number of tasks in `Downloading` never exceeds the
//! concurrency limit.

use downpour_core::{
    DownloadTask, ManagerConfig, TaskId, TaskStatus, TransferError, TransferResult,
};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

/// A task the queue just moved into `Downloading`; everything the
/// engine needs to start the attempt.
#[derive(Clone, Debug)]
pub struct PromotedTask {
    /// Task identity.
    pub id: TaskId,
    /// Source URL.
    pub url: String,
    /// Destination file path.
    pub destination: PathBuf,
    /// Offset to resume from, taken from the task's received bytes.
    pub resume_offset: u64,
}

/// What the manager should do after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Requeue the task after this delay.
    Requeue {
        /// Fixed backoff before the task rejoins the queue.
        delay: Duration,
    },
    /// The failure is terminal; the task stays in `Error`.
    Terminal,
}

/// FIFO queue of download tasks with a concurrency cap.
#[derive(Debug)]
pub struct TransferQueue {
    tasks: HashMap<TaskId, DownloadTask>,
    queued: VecDeque<TaskId>,
    concurrency_limit: u32,
    max_retries: u32,
    auto_retry: bool,
    retry_backoff: Duration,
}

impl TransferQueue {
    /// Create a queue from manager configuration.
    #[must_use]
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            tasks: HashMap::new(),
            queued: VecDeque::new(),
            concurrency_limit: config.concurrency_limit,
            max_retries: config.max_retries,
            auto_retry: config.auto_retry,
            retry_backoff: config.retry_backoff,
        }
    }

    /// Add a task to the back of the queue.
    ///
    /// A task that is already queued or downloading is rejected; a task
    /// known from an earlier run (paused, errored, completed) is
    /// replaced by the incoming one.
    pub fn enqueue(&mut self, mut task: DownloadTask) -> TransferResult<()> {
        if let Some(existing) = self.tasks.get(&task.id) {
            if matches!(
                existing.status,
                TaskStatus::Queued | TaskStatus::Downloading
            ) {
                return Err(TransferError::already_active(task.id.as_str()));
            }
        }
        task.status = TaskStatus::Queued;
        task.speed_bps = 0.0;
        self.queued.push_back(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Move queued tasks into `Downloading` while slots are free.
    ///
    /// Each promotion bumps the attempt counter, clears the last error
    /// and snapshots the resume offset from the task's received bytes.
    pub fn promote(&mut self) -> Vec<PromotedTask> {
        let mut promoted = Vec::new();
        while self.downloading_count() < self.concurrency_limit as usize {
            let Some(id) = self.queued.pop_front() else {
                break;
            };
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            // stale deque entry, e.g. the task was re-enqueued or removed
            if task.status != TaskStatus::Queued {
                continue;
            }
            task.status = TaskStatus::Downloading;
            task.attempt += 1;
            task.last_error = None;
            promoted.push(PromotedTask {
                id: task.id.clone(),
                url: task.url.clone(),
                destination: task.destination_path.clone(),
                resume_offset: task.received_bytes,
            });
        }
        promoted
    }

    /// Record a completed attempt.
    pub fn on_completed(&mut self, id: &TaskId, received_bytes: u64, total_bytes: u64) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = TaskStatus::Completed;
            task.received_bytes = received_bytes;
            task.total_bytes = total_bytes;
            task.speed_bps = 0.0;
        }
    }

    /// Record a paused attempt, keeping the byte counts for a later
    /// resume.
    pub fn on_paused(&mut self, id: &TaskId, received_bytes: u64, total_bytes: u64) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = TaskStatus::Paused;
            task.received_bytes = received_bytes;
            if total_bytes > 0 {
                task.total_bytes = total_bytes;
            }
            task.speed_bps = 0.0;
        }
    }

    /// Record a failed attempt and decide whether it is worth retrying
    /// automatically.
    pub fn on_failed(&mut self, id: &TaskId, error: &TransferError) -> FailureDisposition {
        let Some(task) = self.tasks.get_mut(id) else {
            return FailureDisposition::Terminal;
        };
        task.status = TaskStatus::Error;
        task.last_error = Some(error.to_string());
        task.speed_bps = 0.0;

        if self.auto_retry && error.is_recoverable() && task.attempt < self.max_retries {
            FailureDisposition::Requeue {
                delay: self.retry_backoff,
            }
        } else {
            FailureDisposition::Terminal
        }
    }

    /// Put a paused or errored task back at the end of the queue. Its
    /// received bytes become the resume offset of the next attempt.
    pub fn resume(&mut self, id: &TaskId) -> TransferResult<()> {
        let Some(task) = self.tasks.get_mut(id) else {
            return Err(TransferError::not_found(id.as_str()));
        };
        match task.status {
            TaskStatus::Queued | TaskStatus::Downloading => {
                Err(TransferError::already_active(id.as_str()))
            }
            TaskStatus::Completed => Err(TransferError::other(format!(
                "Task {id} is already completed"
            ))),
            TaskStatus::Paused | TaskStatus::Error | TaskStatus::Pending => {
                task.status = TaskStatus::Queued;
                self.queued.push_back(id.clone());
                Ok(())
            }
        }
    }

    /// Remove a task entirely. Returns the removed task, if any.
    pub fn remove(&mut self, id: &TaskId) -> Option<DownloadTask> {
        self.queued.retain(|queued| queued != id);
        self.tasks.remove(id)
    }

    /// Change the concurrency limit. Lowering it never interrupts
    /// running transfers; the new cap applies to future promotions.
    pub fn set_concurrency_limit(&mut self, limit: u32) {
        self.concurrency_limit = limit;
    }

    /// Look up a single task.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&DownloadTask> {
        self.tasks.get(id)
    }

    /// Snapshot every known task. Byte counts are written back at
    /// terminal and paused transitions only; per-chunk progress goes out
    /// through the event sink and is not mirrored here.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DownloadTask> {
        self.tasks.values().cloned().collect()
    }

    /// Count of tasks currently in `Downloading`.
    #[must_use]
    pub fn downloading_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|task| task.status == TaskStatus::Downloading)
            .count()
    }

    /// Count of tasks waiting for a slot.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|task| task.status == TaskStatus::Queued)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ManagerConfig {
        ManagerConfig::default().with_concurrency_limit(2)
    }

    fn task(id: &str) -> DownloadTask {
        DownloadTask::new(
            TaskId::new(id),
            format!("http://host/{id}.bin"),
            format!("/tmp/{id}.bin"),
        )
    }

    #[test]
    fn test_enqueue_rejects_active_duplicate() {
        let mut queue = TransferQueue::new(&config());
        queue.enqueue(task("a")).unwrap();
        let err = queue.enqueue(task("a")).unwrap_err();
        assert!(matches!(err, TransferError::AlreadyActive { .. }));
    }

    #[test]
    fn test_enqueue_replaces_terminal_task() {
        let mut queue = TransferQueue::new(&config());
        queue.enqueue(task("a")).unwrap();
        queue.promote();
        queue.on_failed(&TaskId::new("a"), &TransferError::http_status(404));

        queue.enqueue(task("a")).unwrap();
        assert_eq!(
            queue.task(&TaskId::new("a")).unwrap().status,
            TaskStatus::Queued
        );
    }

    #[test]
    fn test_promote_respects_limit() {
        let mut queue = TransferQueue::new(&config());
        for id in ["a", "b", "c"] {
            queue.enqueue(task(id)).unwrap();
        }

        let promoted = queue.promote();
        assert_eq!(promoted.len(), 2);
        assert_eq!(queue.downloading_count(), 2);
        assert_eq!(queue.queued_count(), 1);

        // nothing else fits until a slot opens
        assert!(queue.promote().is_empty());

        queue.on_completed(&TaskId::new("a"), 10, 10);
        let promoted = queue.promote();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].id.as_str(), "c");
    }

    #[test]
    fn test_limit_two_with_five_queued() {
        let mut queue = TransferQueue::new(&config());
        for id in ["a", "b", "c", "d", "e"] {
            queue.enqueue(task(id)).unwrap();
        }

        assert_eq!(queue.promote().len(), 2);
        assert_eq!(queue.downloading_count(), 2);
        assert_eq!(queue.queued_count(), 3);

        queue.on_completed(&TaskId::new("a"), 10, 10);
        let promoted = queue.promote();
        assert_eq!(promoted.len(), 1);
        assert_eq!(queue.downloading_count(), 2);
    }

    #[test]
    fn test_promote_bumps_attempt_and_clears_error() {
        let mut queue = TransferQueue::new(&config());
        queue.enqueue(task("a")).unwrap();
        let promoted = queue.promote();
        assert_eq!(promoted.len(), 1);

        let id = TaskId::new("a");
        assert_eq!(queue.task(&id).unwrap().attempt, 1);

        queue.on_failed(&id, &TransferError::connection("reset"));
        assert!(queue.task(&id).unwrap().last_error.is_some());

        queue.resume(&id).unwrap();
        queue.promote();
        let after = queue.task(&id).unwrap();
        assert_eq!(after.attempt, 2);
        assert!(after.last_error.is_none());
    }

    #[test]
    fn test_pause_resume_carries_offset() {
        let mut queue = TransferQueue::new(&config());
        queue.enqueue(task("a")).unwrap();
        queue.promote();

        let id = TaskId::new("a");
        queue.on_paused(&id, 500_000, 1_000_000);
        assert_eq!(queue.task(&id).unwrap().status, TaskStatus::Paused);

        queue.resume(&id).unwrap();
        let promoted = queue.promote();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].resume_offset, 500_000);
    }

    #[test]
    fn test_resume_rejects_active_or_completed() {
        let mut queue = TransferQueue::new(&config());
        queue.enqueue(task("a")).unwrap();
        let id = TaskId::new("a");

        assert!(matches!(
            queue.resume(&id),
            Err(TransferError::AlreadyActive { .. })
        ));

        queue.promote();
        queue.on_completed(&id, 10, 10);
        assert!(matches!(queue.resume(&id), Err(TransferError::Other { .. })));

        assert!(matches!(
            queue.resume(&TaskId::new("ghost")),
            Err(TransferError::NotFound { .. })
        ));
    }

    #[test]
    fn test_failure_disposition() {
        let cfg = config()
            .with_auto_retry(true)
            .with_max_retries(2)
            .with_retry_backoff(Duration::from_millis(10));
        let mut queue = TransferQueue::new(&cfg);
        queue.enqueue(task("a")).unwrap();
        queue.promote();
        let id = TaskId::new("a");

        // attempt 1 of 2, recoverable: retry
        assert_eq!(
            queue.on_failed(&id, &TransferError::connection("reset")),
            FailureDisposition::Requeue {
                delay: Duration::from_millis(10)
            }
        );

        queue.resume(&id).unwrap();
        queue.promote();
        // attempt 2 of 2: budget exhausted
        assert_eq!(
            queue.on_failed(&id, &TransferError::connection("reset")),
            FailureDisposition::Terminal
        );
    }

    #[test]
    fn test_unrecoverable_failure_is_terminal() {
        let cfg = config().with_auto_retry(true);
        let mut queue = TransferQueue::new(&cfg);
        queue.enqueue(task("a")).unwrap();
        queue.promote();

        assert_eq!(
            queue.on_failed(&TaskId::new("a"), &TransferError::http_status(403)),
            FailureDisposition::Terminal
        );
    }

    #[test]
    fn test_raising_limit_unblocks_queue() {
        let mut queue = TransferQueue::new(&config().with_concurrency_limit(1));
        queue.enqueue(task("a")).unwrap();
        queue.enqueue(task("b")).unwrap();

        assert_eq!(queue.promote().len(), 1);
        queue.set_concurrency_limit(3);
        assert_eq!(queue.promote().len(), 1);
        assert_eq!(queue.downloading_count(), 2);
    }

    #[test]
    fn test_remove_drops_queued_entry() {
        let mut queue = TransferQueue::new(&config());
        queue.enqueue(task("a")).unwrap();
        assert!(queue.remove(&TaskId::new("a")).is_some());
        assert!(queue.promote().is_empty());
        assert!(queue.remove(&TaskId::new("a")).is_none());
    }
}
