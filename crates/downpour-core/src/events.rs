//! Typed events emitted during transfers.
//!
//! Events carry everything a consumer needs to render state without
//! querying back into the engine. They serialize with a `type` tag so
//! sinks can forward them over JSON channels unchanged.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Events emitted over the course of a transfer's lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    /// Periodic progress update, throttled by the reporter.
    Progress {
        /// Task this event belongs to.
        id: TaskId,
        /// Percentage complete, absent while the total size is unknown.
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
        /// Bytes received so far.
        received_bytes: u64,
        /// Total size in bytes, 0 while unknown.
        total_bytes: u64,
        /// Instantaneous transfer rate in bytes per second.
        speed_bps: f64,
    },

    /// The transfer finished and all bytes are flushed to disk.
    Completed {
        /// Task this event belongs to.
        id: TaskId,
        /// Path of the finished file.
        destination_path: PathBuf,
    },

    /// The transfer failed.
    Error {
        /// Task this event belongs to.
        id: TaskId,
        /// Human-readable failure reason.
        message: String,
    },

    /// The transfer was suspended at the user's request.
    Paused {
        /// Task this event belongs to.
        id: TaskId,
        /// Bytes retained on disk at the pause point.
        received_bytes: u64,
        /// Total size in bytes, 0 while unknown.
        total_bytes: u64,
    },
}

impl TransferEvent {
    /// Create a progress event, deriving `percent` from the byte counts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(id: TaskId, received_bytes: u64, total_bytes: u64, speed_bps: f64) -> Self {
        let percent =
            (total_bytes > 0).then(|| received_bytes as f64 / total_bytes as f64 * 100.0);
        Self::Progress {
            id,
            percent,
            received_bytes,
            total_bytes,
            speed_bps,
        }
    }

    /// Create a completed event.
    #[must_use]
    pub fn completed(id: TaskId, destination_path: impl Into<PathBuf>) -> Self {
        Self::Completed {
            id,
            destination_path: destination_path.into(),
        }
    }

    /// Create an error event.
    #[must_use]
    pub fn error(id: TaskId, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            message: message.into(),
        }
    }

    /// Create a paused event.
    #[must_use]
    pub const fn paused(id: TaskId, received_bytes: u64, total_bytes: u64) -> Self {
        Self::Paused {
            id,
            received_bytes,
            total_bytes,
        }
    }

    /// The task this event belongs to.
    #[must_use]
    pub const fn id(&self) -> &TaskId {
        match self {
            Self::Progress { id, .. }
            | Self::Completed { id, .. }
            | Self::Error { id, .. }
            | Self::Paused { id, .. } => id,
        }
    }

    /// Channel name for adapters that route events by name.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "transfer:progress",
            Self::Completed { .. } => "transfer:completed",
            Self::Error { .. } => "transfer:error",
            Self::Paused { .. } => "transfer:paused",
        }
    }
}
