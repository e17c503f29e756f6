//! Download engine for downpour.
//!
//! Layers, bottom to top:
//! - [`progress`]: per-task progress throttling and speed computation.
//! - [`registry`]: live transfer control handles (pause flags, cancel
//!   tokens, attempt leases).
//! - [`engine`]: a single HTTP attempt, from request to disk.
//! - [`scheduler`]: the pure queue state machine.
//! - [`manager`]: the orchestrator tying all of it together.
//!
//! Consumers normally construct a [`DownloadManager`] and talk only to it.

pub mod engine;
pub mod manager;
pub mod progress;
pub mod registry;
pub mod scheduler;

pub use engine::{TransferEngine, TransferOutcome, TransferRequest};
pub use manager::DownloadManager;
pub use progress::{ProgressSample, ProgressThrottle};
pub use registry::{TransferHandle, TransferRegistry};
pub use scheduler::{FailureDisposition, PromotedTask, TransferQueue};

pub use downpour_core::{
    BroadcastEventSink, DownloadTask, EventSink, ManagerConfig, NoopEventSink, TaskId, TaskStatus,
    TransferError, TransferEvent, TransferResult,
};
