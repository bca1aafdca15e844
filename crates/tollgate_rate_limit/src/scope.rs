//! Composition helpers that put a limiter in front of an operation.
//!
//! Both limiters implement [`Limiter`], so the helpers here work with either
//! the in-process bucket or the cross-process window.

use crate::{CrossProcessLimiter, TokenBucketLimiter};
use std::time::{Duration, Instant};
use tollgate_error::TollgateResult;
use tracing::{debug, warn};

/// Admission control for one call at a time.
pub trait Limiter: Send + Sync {
    /// Wait up to `timeout` for one call's worth of quota.
    ///
    /// `Ok(false)` means the timeout passed without admission.
    fn acquire(&self, timeout: Option<Duration>) -> TollgateResult<bool>;

    /// Short name used in log fields.
    fn label(&self) -> &'static str;
}

impl Limiter for TokenBucketLimiter {
    fn acquire(&self, timeout: Option<Duration>) -> TollgateResult<bool> {
        Ok(TokenBucketLimiter::acquire(self, 1, timeout))
    }

    fn label(&self) -> &'static str {
        "token_bucket"
    }
}

impl Limiter for CrossProcessLimiter {
    /// `None` falls back to the configured acquire timeout; the shared window
    /// never waits unbounded.
    fn acquire(&self, timeout: Option<Duration>) -> TollgateResult<bool> {
        match timeout {
            Some(timeout) => CrossProcessLimiter::acquire(self, timeout),
            None => self.acquire_default(),
        }
    }

    fn label(&self) -> &'static str {
        "cross_process"
    }
}

/// Acquire from `limiter`, then run `operation`.
///
/// Returns `Ok(None)` without running the operation when no quota was granted
/// within `timeout`.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tollgate_rate_limit::{TokenBucketLimiter, with_rate_limit};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = TokenBucketLimiter::new(60, Some(1))?;
/// assert_eq!(with_rate_limit(&limiter, Some(Duration::ZERO), || 7)?, Some(7));
/// assert_eq!(with_rate_limit(&limiter, Some(Duration::ZERO), || 7)?, None);
/// # Ok(())
/// # }
/// ```
pub fn with_rate_limit<L, F, R>(
    limiter: &L,
    timeout: Option<Duration>,
    operation: F,
) -> TollgateResult<Option<R>>
where
    L: Limiter + ?Sized,
    F: FnOnce() -> R,
{
    Ok(RateLimitScope::enter(limiter, timeout)?.run(operation))
}

/// Wrap `operation` so every call first acquires from `limiter`.
pub fn rate_limited<'a, L, F, R>(
    limiter: &'a L,
    timeout: Option<Duration>,
    mut operation: F,
) -> impl FnMut() -> TollgateResult<Option<R>>
where
    L: Limiter + ?Sized,
    F: FnMut() -> R,
{
    move || with_rate_limit(limiter, timeout, &mut operation)
}

/// Scoped acquisition.
///
/// The attempt is counted by the limiter when the scope is entered, before
/// the operation runs, so it is recorded even if the operation panics. The
/// scope logs how long the guarded work took when it ends.
#[derive(Debug)]
pub struct RateLimitScope<'a, L: Limiter + ?Sized> {
    limiter: &'a L,
    admitted: bool,
    entered: Instant,
}

impl<'a, L: Limiter + ?Sized> RateLimitScope<'a, L> {
    /// Wait up to `timeout` for admission.
    ///
    /// # Errors
    ///
    /// Propagates platform and storage errors from the limiter.
    pub fn enter(limiter: &'a L, timeout: Option<Duration>) -> TollgateResult<Self> {
        let admitted = limiter.acquire(timeout)?;
        if !admitted {
            debug!(limiter = limiter.label(), "Rate limit scope not admitted");
        }
        Ok(Self {
            limiter,
            admitted,
            entered: Instant::now(),
        })
    }

    /// Whether quota was granted.
    pub fn admitted(&self) -> bool {
        self.admitted
    }

    /// Run `operation` if admitted.
    pub fn run<F, R>(self, operation: F) -> Option<R>
    where
        F: FnOnce() -> R,
    {
        self.admitted.then(operation)
    }
}

impl<L: Limiter + ?Sized> Drop for RateLimitScope<'_, L> {
    fn drop(&mut self) {
        if !self.admitted {
            return;
        }
        let elapsed_secs = self.entered.elapsed().as_secs_f64();
        if std::thread::panicking() {
            warn!(limiter = self.limiter.label(), elapsed_secs, "Rate-limited operation panicked");
        } else {
            debug!(limiter = self.limiter.label(), elapsed_secs, "Rate-limited operation finished");
        }
    }
}
