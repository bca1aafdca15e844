//! Backoff computation and retry policy.
//!
//! Everything here is stateless apart from the caller-owned attempt counter,
//! so a single [`RetryPolicy`] can be shared by any number of threads.
//!
//! The wait after a failed call comes from one of two places:
//! - a server retry hint (`Retry-After`, in seconds or as an HTTP-date), which wins
//! - exponential backoff `min(max_delay, base_delay * 2^attempt)`, optionally
//!   with full jitter (uniform in `[0, ceiling]`)

use crate::{HeaderNames, HeaderSource, RetryConfig, TokenBucketLimiter};
use std::fmt::Display;
use std::time::{Duration, SystemTime};
use tollgate_error::{BuilderError, RetryableError, TollgateResult};
use tracing::{debug, instrument, warn};

/// Default first backoff step.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default backoff ceiling.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default number of retries before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Compute the wait before retry number `attempt` (zero-based).
///
/// Without jitter this is `min(max_delay, base_delay * 2^attempt)`. With
/// jitter the result is drawn uniformly from zero up to that ceiling.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tollgate_rate_limit::calculate_backoff;
///
/// let base = Duration::from_secs(1);
/// let max = Duration::from_secs(60);
/// assert_eq!(calculate_backoff(3, base, max, false), Duration::from_secs(8));
/// assert_eq!(calculate_backoff(10, base, max, false), Duration::from_secs(60));
/// assert!(calculate_backoff(3, base, max, true) <= Duration::from_secs(8));
/// ```
pub fn calculate_backoff(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
) -> Duration {
    let ceiling = backoff_ceiling(attempt, base_delay, max_delay);
    if jitter {
        tokio_retry2::strategy::jitter(ceiling)
    } else {
        ceiling
    }
}

fn backoff_ceiling(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    // 2^1023 is the largest finite power of two
    let exponent = attempt.min(1023) as i32;
    let secs = base_delay.as_secs_f64() * 2f64.powi(exponent);
    if secs.is_finite() && secs < max_delay.as_secs_f64() {
        Duration::from_secs_f64(secs)
    } else {
        max_delay
    }
}

/// Parse a `Retry-After` value.
///
/// Accepts delay-seconds (`"120"`) or an HTTP-date
/// (`"Fri, 15 May 2015 15:34:21 GMT"`). A date in the past yields
/// `Duration::ZERO`. Absent or unparseable values yield `None`, in which case
/// the caller falls back to [`calculate_backoff`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tollgate_rate_limit::parse_retry_after;
///
/// assert_eq!(parse_retry_after(Some("120")), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after(None), None);
/// assert_eq!(parse_retry_after(Some("not-a-number-or-date")), None);
/// ```
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    // Some servers send fractional seconds; out-of-range values are unusable
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    httpdate::parse_http_date(value).ok().map(|when| {
        when.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    })
}

/// Retry policy: how many attempts, how long to wait between them.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tollgate_rate_limit::RetryPolicy;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = RetryPolicy::builder()
///     .max_attempts(3u32)
///     .base_delay(Duration::from_millis(500))
///     .jitter(false)
///     .build()?;
///
/// assert_eq!(policy.retry_delay(0, None), Some(Duration::from_millis(500)));
/// assert_eq!(policy.retry_delay(3, None), None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, derive_builder::Builder, derive_getters::Getters)]
#[builder(
    setter(into),
    build_fn(private, name = "build_internal", validate = "Self::validate")
)]
pub struct RetryPolicy {
    /// Attempts after which the policy gives up
    #[builder(default = "DEFAULT_MAX_ATTEMPTS")]
    max_attempts: u32,
    /// First backoff step
    #[builder(default = "DEFAULT_BASE_DELAY")]
    base_delay: Duration,
    /// Backoff ceiling
    #[builder(default = "DEFAULT_MAX_DELAY")]
    max_delay: Duration,
    /// Draw each delay uniformly from `[0, ceiling]`
    #[builder(default = "true")]
    jitter: bool,
    /// Where to look for the server retry hint
    #[builder(default)]
    header_names: HeaderNames,
}

impl RetryPolicyBuilder {
    /// Build the RetryPolicy.
    ///
    /// # Errors
    ///
    /// Returns error if `max_delay` is shorter than `base_delay`.
    pub fn build(&self) -> TollgateResult<RetryPolicy> {
        self.build_internal()
            .map_err(|e| BuilderError::from(e.to_string()).into())
    }

    fn validate(&self) -> Result<(), String> {
        let base = self.base_delay.unwrap_or(DEFAULT_BASE_DELAY);
        let max = self.max_delay.unwrap_or(DEFAULT_MAX_DELAY);
        if max < base {
            return Err(format!(
                "max_delay ({:?}) must not be shorter than base_delay ({:?})",
                max, base
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
            header_names: HeaderNames::default(),
        }
    }
}

impl RetryPolicy {
    /// Start building a policy.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Policy from the `[retry]` and `[headers]` configuration sections.
    ///
    /// # Errors
    ///
    /// Returns error if the delays are negative, non-finite, out of range or inverted.
    pub fn from_config(retry: &RetryConfig, header_names: &HeaderNames) -> TollgateResult<Self> {
        retry.validate()?;
        Self::builder()
            .max_attempts(retry.max_attempts)
            .base_delay(retry.base_delay()?)
            .max_delay(retry.max_delay()?)
            .jitter(retry.jitter)
            .header_names(header_names.clone())
            .build()
    }

    /// Backoff for `attempt` under this policy, ignoring any server hint.
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay, self.jitter)
    }

    /// Server retry hint from the configured header, if usable.
    pub fn retry_hint(&self, headers: &dyn HeaderSource) -> Option<Duration> {
        parse_retry_after(headers.header(&self.header_names.retry_after))
    }

    /// Wait before the next attempt, or `None` to give up.
    ///
    /// A usable server hint is returned as-is. Otherwise the policy gives up
    /// once `attempt >= max_attempts` and returns computed backoff before that.
    #[instrument(skip(self, headers))]
    pub fn retry_delay(&self, attempt: u32, headers: Option<&dyn HeaderSource>) -> Option<Duration> {
        if let Some(hint) = headers.and_then(|h| self.retry_hint(h)) {
            debug!(hint_secs = hint.as_secs_f64(), "Using server retry hint");
            return Some(hint);
        }

        if attempt >= self.max_attempts {
            debug!(max_attempts = self.max_attempts, "Retry attempts exhausted");
            return None;
        }

        Some(self.backoff(attempt))
    }

    /// Backoff sequence for every allowed retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(move |attempt| self.backoff(attempt))
    }

    /// Fresh per-operation retry context.
    pub fn context(&self) -> RetryContext<'_> {
        RetryContext {
            policy: self,
            attempt: 0,
        }
    }

    /// Run a blocking operation, sleeping between retryable failures.
    ///
    /// The closure receives the zero-based attempt number. Permanent errors
    /// and exhausted attempts return the last error.
    pub fn run<F, R, E>(&self, mut operation: F) -> Result<R, E>
    where
        F: FnMut(u32) -> Result<R, E>,
        E: RetryableError + Display,
    {
        let mut context = self.context();
        loop {
            let attempt = context.attempt();
            let err = match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!("Permanent error, failing immediately: {}", err);
                return Err(err);
            }
            if attempt >= self.max_attempts {
                warn!(attempt, "Retries exhausted: {}", err);
                return Err(err);
            }

            let delay = err.retry_after().unwrap_or_else(|| self.backoff(attempt));
            warn!(attempt, delay_secs = delay.as_secs_f64(), "Transient error, will retry: {}", err);
            context.advance();
            std::thread::sleep(delay);
        }
    }

    /// Execute an async operation with token bucket admission and retry.
    ///
    /// For each attempt:
    /// 1. Waits on the bucket (on the tokio timer, not by blocking the thread)
    /// 2. Executes the operation
    /// 3. Retries transient errors using this policy's backoff, or the
    ///    server hint from [`RetryableError::retry_after`] when given
    /// 4. Returns permanent errors immediately
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let result = policy.execute(&limiter, || async {
    ///     client.fetch(&request).await
    /// }).await?;
    /// ```
    pub async fn execute<F, Fut, R, E>(
        &self,
        limiter: &TokenBucketLimiter,
        operation: F,
    ) -> Result<R, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<R, E>>,
        E: RetryableError + Display,
    {
        use tokio_retry2::{Retry, RetryError};

        Retry::spawn(self.delays(), || async {
            limiter.until_ready(1).await;

            match operation().await {
                Ok(value) => Ok(value),
                Err(e) => {
                    if e.is_retryable() {
                        warn!("Transient error, will retry: {}", e);
                        let retry_after = e.retry_after();
                        Err(RetryError::Transient {
                            err: e,
                            retry_after,
                        })
                    } else {
                        warn!("Permanent error, failing immediately: {}", e);
                        Err(RetryError::Permanent(e))
                    }
                }
            }
        })
        .await
    }
}

/// Per-operation retry bookkeeping.
///
/// Owned by the caller for one logical operation; never shared or persisted.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
}

impl RetryContext<'_> {
    /// Zero-based number of failed tries so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next try, then count the failed try.
    ///
    /// Returns `None` when the policy gives up.
    pub fn next_delay(&mut self, headers: Option<&dyn HeaderSource>) -> Option<Duration> {
        let delay = self.policy.retry_delay(self.attempt, headers);
        self.advance();
        delay
    }

    /// Count a failed try without computing a delay.
    pub fn advance(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }

    /// Start over, e.g. after a success in a long-running loop.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn fixed(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .jitter(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_backoff_doubles_until_saturated() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        let delays: Vec<u64> = (0..8)
            .map(|attempt| calculate_backoff(attempt, base, max, false).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let max = Duration::from_secs(60);
        assert_eq!(calculate_backoff(u32::MAX, Duration::from_secs(1), max, false), max);
    }

    #[test]
    fn test_jitter_stays_below_ceiling() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(10);
        for attempt in 0..6 {
            let ceiling = calculate_backoff(attempt, base, max, false);
            for _ in 0..50 {
                assert!(calculate_backoff(attempt, base, max, true) <= ceiling);
            }
        }
    }

    #[test]
    fn test_retry_after_http_date() {
        assert_eq!(
            parse_retry_after(Some("Fri, 15 May 2015 15:34:21 GMT")),
            Some(Duration::ZERO)
        );
        let future = parse_retry_after(Some("Fri, 15 May 4099 15:34:21 GMT"));
        assert!(matches!(future, Some(d) if d.as_secs() > 0));
    }

    #[test]
    fn test_retry_after_rejects_negative_and_blank() {
        assert_eq!(parse_retry_after(Some("-1")), None);
        assert_eq!(parse_retry_after(Some("   ")), None);
        assert_eq!(parse_retry_after(Some(" 2.5 ")), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_retry_after_out_of_range_is_ignored() {
        assert_eq!(parse_retry_after(Some("99999999999999999999")), None);
        assert_eq!(parse_retry_after(Some("1e30")), None);
        assert_eq!(parse_retry_after(Some("NaN")), None);
        assert_eq!(parse_retry_after(Some("inf")), None);

        let policy = fixed(2);
        let headers = HashMap::from([("Retry-After", "1e30")]);
        assert_eq!(policy.retry_delay(0, Some(&headers)), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_hint_wins_over_backoff() {
        let policy = fixed(2);
        let headers = HashMap::from([("Retry-After", "7")]);
        assert_eq!(
            policy.retry_delay(0, Some(&headers)),
            Some(Duration::from_secs(7))
        );
        // A hint is honoured even after the attempts are used up
        assert_eq!(
            policy.retry_delay(5, Some(&headers)),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = fixed(2);
        let headers: HashMap<&str, &str> = HashMap::new();
        assert_eq!(policy.retry_delay(1, Some(&headers)), Some(Duration::from_secs(2)));
        assert_eq!(policy.retry_delay(2, Some(&headers)), None);
    }

    #[test]
    fn test_context_counts_attempts() {
        let policy = fixed(3);
        let mut context = policy.context();
        assert_eq!(context.next_delay(None), Some(Duration::from_secs(1)));
        assert_eq!(context.next_delay(None), Some(Duration::from_secs(2)));
        assert_eq!(context.next_delay(None), Some(Duration::from_secs(4)));
        assert_eq!(context.next_delay(None), None);
        assert_eq!(context.attempt(), 4);

        context.reset();
        assert_eq!(context.attempt(), 0);
    }

    #[test]
    fn test_builder_rejects_inverted_delays() {
        let result = RetryPolicy::builder()
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(1))
            .build();
        let err = result.unwrap_err();
        match err.kind() {
            tollgate_error::TollgateErrorKind::Builder(builder) => assert!(matches!(
                builder.kind(),
                tollgate_error::BuilderErrorKind::ValidationFailed(msg) if msg.contains("max_delay")
            )),
            other => panic!("expected builder error, got {:?}", other),
        }
    }

    #[test]
    fn test_delays_has_one_entry_per_attempt() {
        let policy = fixed(4);
        let delays: Vec<Duration> = policy.delays().collect();
        assert_eq!(delays.len(), 4);
        assert_eq!(delays[3], Duration::from_secs(8));
    }
}
