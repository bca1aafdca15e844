//! Token bucket usage counters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of a limiter's usage counters.
///
/// Created with the limiter, cleared by `reset_stats`, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LimiterStats {
    /// Admission requests, successful or not
    pub total_requests: u64,
    /// Requests that had to wait for tokens
    pub total_waits: u64,
    /// Cumulative time spent waiting, in seconds
    pub wait_time_seconds: f64,
    /// Header updates reporting remaining quota below the warning threshold
    pub rate_limit_warnings: u64,
}

impl LimiterStats {
    /// Share of requests that waited, as a percentage (0-100).
    pub fn wait_percentage(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_waits as f64 / self.total_requests as f64 * 100.0
        }
    }

    /// Mean wait per waiting request, in seconds.
    pub fn avg_wait_time_seconds(&self) -> f64 {
        if self.total_waits == 0 {
            0.0
        } else {
            self.wait_time_seconds / self.total_waits as f64
        }
    }

    pub(crate) fn record_request(&mut self) {
        self.total_requests += 1;
    }

    pub(crate) fn record_wait_started(&mut self) {
        self.total_waits += 1;
    }

    pub(crate) fn record_wait_time(&mut self, waited: Duration) {
        self.wait_time_seconds += waited.as_secs_f64();
    }

    pub(crate) fn record_warning(&mut self) {
        self.rate_limit_warnings += 1;
    }
}
