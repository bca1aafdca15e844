//! Retry classification for caller errors.

use std::time::Duration;

/// Trait for errors that support retry logic.
///
/// Callers implement this for the error type of the quota-limited operation so
/// the retry helpers know whether another attempt makes sense, and whether the
/// server already told them how long to wait.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tollgate_error::RetryableError;
///
/// #[derive(Debug)]
/// struct Throttled(u64);
///
/// impl RetryableError for Throttled {
///     fn is_retryable(&self) -> bool {
///         true
///     }
///
///     fn retry_after(&self) -> Option<Duration> {
///         Some(Duration::from_secs(self.0))
///     }
/// }
///
/// let err = Throttled(30);
/// assert!(err.is_retryable());
/// assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
/// ```
pub trait RetryableError {
    /// Returns true if this error should trigger a retry.
    ///
    /// Throttling (429), overload (503) and network timeouts should return
    /// true. Permanent errors like 401 or 400 should return false.
    fn is_retryable(&self) -> bool;

    /// Server supplied retry hint, usually parsed from a `Retry-After` header.
    ///
    /// When present, the hint wins over computed backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}
