//! Task model for downloads.
//!
//! Pure data types with no I/O dependencies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Opaque identifier for a download task, stable for the task's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new task ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Status of a download task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by the consumer, not yet handed to the scheduler.
    Pending,
    /// Waiting for a concurrency slot.
    Queued,
    /// Actively transferring bytes.
    Downloading,
    /// Suspended by the user; bytes on disk are retained.
    Paused,
    /// Finished successfully.
    Completed,
    /// Failed with an error.
    Error,
}

impl TaskStatus {
    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "downloading" => Self::Downloading,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "error" => Self::Error,
            // "pending" or unknown values default to Pending
            _ => Self::Pending,
        }
    }

    /// Whether this status is terminal for the current attempt.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// The unit of work the user manages.
///
/// `received_bytes` persists across pause/resume so a later start can
/// continue from the exact byte offset. `total_bytes` is 0 until the
/// first response reveals the resource size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Unique identifier, stable for the task's lifetime.
    pub id: TaskId,
    /// Source resource locator.
    pub url: String,
    /// Absolute path of the file being written.
    pub destination_path: PathBuf,
    /// Current status.
    pub status: TaskStatus,
    /// Bytes durably written so far.
    pub received_bytes: u64,
    /// Resource size in bytes; 0 while unknown.
    pub total_bytes: u64,
    /// Last computed instantaneous transfer rate.
    pub speed_bps: f64,
    /// Count of start attempts, used to bound retries.
    pub attempt: u32,
    /// Last failure reason, cleared on successful (re)start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DownloadTask {
    /// Create a fresh task in `Pending` status.
    pub fn new(id: TaskId, url: impl Into<String>, destination_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            url: url.into(),
            destination_path: destination_path.into(),
            status: TaskStatus::Pending,
            received_bytes: 0,
            total_bytes: 0,
            speed_bps: 0.0,
            attempt: 0,
            last_error: None,
        }
    }

    /// Set the starting byte offset (for resuming an earlier transfer).
    #[must_use]
    pub fn with_resume_offset(mut self, bytes: u64) -> Self {
        self.received_bytes = bytes;
        self
    }

    /// Progress percentage, `None` while the total size is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> Option<f64> {
        (self.total_bytes > 0).then(|| self.received_bytes as f64 / self.total_bytes as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new("task-1");
        assert_eq!(id.to_string(), "task-1");
        assert_eq!(id.as_str(), "task-1");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Downloading,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::Error,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), status);
        }
        assert_eq!(TaskStatus::parse("bogus"), TaskStatus::Pending);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
        assert!(!TaskStatus::Downloading.is_terminal());
    }

    #[test]
    fn test_new_task_defaults() {
        let task = DownloadTask::new(TaskId::new("a"), "http://host/f.bin", "/tmp/f.bin");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.received_bytes, 0);
        assert_eq!(task.total_bytes, 0);
        assert_eq!(task.attempt, 0);
        assert!(task.last_error.is_none());
        assert!(task.percent().is_none());
    }

    #[test]
    fn test_percent_known_total() {
        let mut task = DownloadTask::new(TaskId::new("a"), "http://host/f.bin", "/tmp/f.bin");
        task.received_bytes = 250;
        task.total_bytes = 1000;
        let pct = task.percent().unwrap();
        assert!((pct - 25.0).abs() < f64::EPSILON);
    }
}
