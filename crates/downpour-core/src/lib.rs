//! Core domain types for the downpour download manager.
//!
//! Pure data types and port definitions with no network or disk I/O.
//! The working crate (`downpour-engine`) depends on this one; adapters
//! (CLIs, UIs) should be able to depend on `downpour-core` alone to
//! consume tasks, events, and errors.

pub mod config;
pub mod errors;
pub mod events;
pub mod ports;
pub mod task;

pub use config::ManagerConfig;
pub use errors::{TransferError, TransferResult};
pub use events::TransferEvent;
pub use ports::{BroadcastEventSink, EventSink, NoopEventSink};
pub use task::{DownloadTask, TaskId, TaskStatus};
