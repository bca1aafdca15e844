//! Read-only snapshots of the shared window.

use serde::{Deserialize, Serialize};

/// Utilisation of the shared window at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaStatus {
    /// Configured calls per window
    pub limit: u32,
    /// Window length in seconds
    pub window_seconds: u64,
    /// Admitted calls still inside the window
    pub requests_last_window: usize,
    /// Calls that could be admitted right now
    pub available: usize,
    /// `requests_last_window / limit` as a percentage
    pub utilization_percent: f64,
    /// Age of the oldest admitted call still inside the window
    pub oldest_request_age_seconds: Option<f64>,
}

/// Outcome of a cross-process health check.
///
/// # Example
///
/// ```
/// use tollgate_rate_limit::HealthReport;
///
/// let report = HealthReport::from_warnings(vec!["state file corrupted".to_string()]);
/// assert!(!*report.healthy());
/// assert_eq!(report.warnings().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct HealthReport {
    /// True when no warnings were raised
    healthy: bool,
    /// Human-readable findings
    warnings: Vec<String>,
}

impl HealthReport {
    /// Report that is healthy exactly when `warnings` is empty.
    pub fn from_warnings(warnings: Vec<String>) -> Self {
        Self {
            healthy: warnings.is_empty(),
            warnings,
        }
    }
}
