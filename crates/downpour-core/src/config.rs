//! Manager configuration.

use std::time::Duration;

/// Tunables for the download manager.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Maximum number of tasks transferring at once.
    pub concurrency_limit: u32,
    /// Maximum start attempts per task before a recoverable failure
    /// becomes terminal. Only consulted when `auto_retry` is on.
    pub max_retries: u32,
    /// Automatically requeue tasks after recoverable failures.
    pub auto_retry: bool,
    /// Fixed delay before an automatic requeue.
    pub retry_backoff: Duration,
    /// Minimum interval between progress events for one task.
    pub progress_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 2,
            max_retries: 3,
            auto_retry: false,
            retry_backoff: Duration::from_secs(2),
            progress_interval: Duration::from_millis(500),
        }
    }
}

impl ManagerConfig {
    /// Set the concurrency limit.
    #[must_use]
    pub const fn with_concurrency_limit(mut self, limit: u32) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Set the maximum retry count.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Enable or disable automatic retry of recoverable failures.
    #[must_use]
    pub const fn with_auto_retry(mut self, enabled: bool) -> Self {
        self.auto_retry = enabled;
        self
    }

    /// Set the fixed backoff before an automatic requeue.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the minimum interval between progress events.
    #[must_use]
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}
