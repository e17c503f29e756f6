//! Progress throttling.
//!
//! The transfer loop observes every chunk; consumers do not want an event
//! per chunk. [`ProgressThrottle`] rate-limits emissions to a minimum
//! interval and computes the instantaneous speed over the window since
//! the previous emission. The final sample (received == total) is always
//! let through so consumers see 100%.

use std::time::{Duration, Instant};

/// A progress observation that cleared the throttle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressSample {
    /// Bytes received so far.
    pub received_bytes: u64,
    /// Total size in bytes, 0 while unknown.
    pub total_bytes: u64,
    /// Bytes per second over the window since the last emitted sample.
    pub speed_bps: f64,
}

/// Per-task throttle deciding which byte-count updates become events.
#[derive(Debug)]
pub struct ProgressThrottle {
    min_interval: Duration,
    last_instant: Instant,
    last_bytes: u64,
}

impl ProgressThrottle {
    /// Create a throttle. The first window starts now.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_instant: Instant::now(),
            last_bytes: 0,
        }
    }

    /// Create a throttle whose window starts at a resume offset, so the
    /// first speed sample doesn't count already-present bytes.
    #[must_use]
    pub fn starting_at(min_interval: Duration, offset: u64) -> Self {
        Self {
            min_interval,
            last_instant: Instant::now(),
            last_bytes: offset,
        }
    }

    /// Record the current byte count. Returns a sample when enough time
    /// has passed since the last emission, or when the transfer just
    /// reached its known total.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, received_bytes: u64, total_bytes: u64) -> Option<ProgressSample> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_instant);
        let is_final = total_bytes > 0 && received_bytes >= total_bytes;

        if elapsed < self.min_interval && !is_final {
            return None;
        }

        let delta = received_bytes.saturating_sub(self.last_bytes);
        let secs = elapsed.as_secs_f64();
        let speed_bps = if secs > 0.0 { delta as f64 / secs } else { 0.0 };

        self.last_instant = now;
        self.last_bytes = received_bytes;

        Some(ProgressSample {
            received_bytes,
            total_bytes,
            speed_bps,
        })
    }
}
