//! In-process token bucket limiter.
//!
//! Tokens refill continuously at `requests_per_minute / 60` per second up to
//! the burst capacity. Refill happens lazily whenever the bucket is consulted.
//! All decisions are made under one mutex per limiter; waiting happens with
//! the mutex released so other threads can keep checking availability.

use crate::{HeaderNames, HeaderSource, LimiterStats, QuotaHeaders, TollgateConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tollgate_error::{ConfigError, TollgateResult};
use tracing::{debug, instrument, warn};

/// Mutable bucket state. Invariant: `0 <= tokens <= capacity` after every refill.
#[derive(Debug)]
struct BucketState {
    capacity: f64,
    tokens: f64,
    refill_rate_per_second: f64,
    last_refill: Instant,
}

impl BucketState {
    fn new(capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate_per_second,
            last_refill: Instant::now(),
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate_per_second).clamp(0.0, self.capacity);
        self.last_refill = now;
    }

    /// Time until `requested` tokens will be present, zero if they already are.
    fn deficit_wait(&self, requested: f64) -> Duration {
        if self.tokens >= requested {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64((requested - self.tokens) / self.refill_rate_per_second)
                .unwrap_or(Duration::MAX)
        }
    }
}

#[derive(Debug)]
struct Inner {
    bucket: BucketState,
    stats: LimiterStats,
}

/// Outcome of one look at the bucket.
enum Admission {
    Granted,
    Wait(Duration),
    /// More tokens requested than the bucket can ever hold
    Impossible,
}

/// Thread-safe token bucket with burst capacity and header recalibration.
///
/// Clones share the same bucket and statistics.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tollgate_rate_limit::TokenBucketLimiter;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = TokenBucketLimiter::new(60, Some(2))?;
///
/// assert!(limiter.try_acquire(1));
/// assert!(limiter.acquire(1, Some(Duration::ZERO)));
/// // Bucket drained; no waiting allowed
/// assert!(!limiter.acquire(1, Some(Duration::ZERO)));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TokenBucketLimiter {
    requests_per_minute: u32,
    header_names: HeaderNames,
    inner: Arc<Mutex<Inner>>,
}

impl TokenBucketLimiter {
    /// Create a limiter refilling at `requests_per_minute`, holding at most
    /// `burst_capacity` tokens (defaults to `requests_per_minute`). The bucket
    /// starts full.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the rate or the burst capacity is zero.
    #[instrument]
    pub fn new(requests_per_minute: u32, burst_capacity: Option<u32>) -> TollgateResult<Self> {
        if requests_per_minute == 0 {
            Err(ConfigError::new("requests_per_minute must be positive"))?
        }
        let capacity = burst_capacity.unwrap_or(requests_per_minute);
        if capacity == 0 {
            Err(ConfigError::new("burst_capacity must be positive"))?
        }

        debug!(capacity, "Creating token bucket limiter");
        let bucket = BucketState::new(f64::from(capacity), f64::from(requests_per_minute) / 60.0);

        Ok(Self {
            requests_per_minute,
            header_names: HeaderNames::default(),
            inner: Arc::new(Mutex::new(Inner {
                bucket,
                stats: LimiterStats::default(),
            })),
        })
    }

    /// Create a limiter from the `[limits]` and `[headers]` configuration sections.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the resolved limits are invalid.
    pub fn from_config(config: &TollgateConfig) -> TollgateResult<Self> {
        config.limits.validate()?;
        Ok(Self::new(
            config.limits.resolved_requests_per_minute(),
            Some(config.limits.resolved_burst_capacity()),
        )?
        .with_header_names(config.headers.clone()))
    }

    /// Use custom quota header names for [`update_from_headers`](Self::update_from_headers).
    pub fn with_header_names(mut self, header_names: HeaderNames) -> Self {
        self.header_names = header_names;
        self
    }

    /// Block until `tokens` are available or `timeout` elapses.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` never waits. Returns
    /// `true` once the tokens were deducted, `false` on timeout. Requests
    /// larger than the bucket capacity fail immediately. Tokens are never
    /// granted partially.
    #[instrument(skip(self))]
    pub fn acquire(&self, tokens: u32, timeout: Option<Duration>) -> bool {
        let started = Instant::now();
        let deadline = timeout.and_then(|t| started.checked_add(t));
        let requested = f64::from(tokens);
        let mut waited = false;

        self.inner.lock().stats.record_request();

        loop {
            let sleep_for = {
                let mut inner = self.inner.lock();
                let now = Instant::now();
                match Self::admit(&mut inner.bucket, requested, now) {
                    Admission::Granted => {
                        if waited {
                            inner.stats.record_wait_time(started.elapsed());
                        }
                        return true;
                    }
                    Admission::Impossible => {
                        warn!(
                            tokens,
                            capacity = inner.bucket.capacity,
                            "Requested more tokens than the bucket can hold"
                        );
                        return false;
                    }
                    Admission::Wait(wait) => {
                        let remaining = deadline.map(|d| d.saturating_duration_since(now));
                        if remaining == Some(Duration::ZERO) {
                            if waited {
                                inner.stats.record_wait_time(started.elapsed());
                            }
                            debug!(tokens, "Timed out waiting for tokens");
                            return false;
                        }
                        if !waited {
                            waited = true;
                            inner.stats.record_wait_started();
                        }
                        remaining.map_or(wait, |r| wait.min(r))
                    }
                }
            };

            debug!(sleep_secs = sleep_for.as_secs_f64(), "Waiting for token refill");
            std::thread::sleep(sleep_for);
        }
    }

    /// Take `tokens` if they are available right now; never waits.
    #[instrument(skip(self))]
    pub fn try_acquire(&self, tokens: u32) -> bool {
        let mut inner = self.inner.lock();
        inner.stats.record_request();
        matches!(
            Self::admit(&mut inner.bucket, f64::from(tokens), Instant::now()),
            Admission::Granted
        )
    }

    /// Wait for `tokens` on the tokio timer instead of blocking the thread.
    ///
    /// Returns `false` only when the request exceeds the bucket capacity.
    pub async fn until_ready(&self, tokens: u32) -> bool {
        let started = Instant::now();
        let requested = f64::from(tokens);
        let mut waited = false;

        self.inner.lock().stats.record_request();

        loop {
            let sleep_for = {
                let mut inner = self.inner.lock();
                match Self::admit(&mut inner.bucket, requested, Instant::now()) {
                    Admission::Granted => {
                        if waited {
                            inner.stats.record_wait_time(started.elapsed());
                        }
                        return true;
                    }
                    Admission::Impossible => return false,
                    Admission::Wait(wait) => {
                        if !waited {
                            waited = true;
                            inner.stats.record_wait_started();
                        }
                        wait
                    }
                }
            };
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Refill, then deduct if possible. Must be called under the lock.
    fn admit(bucket: &mut BucketState, requested: f64, now: Instant) -> Admission {
        bucket.refill(now);
        if requested > bucket.capacity {
            return Admission::Impossible;
        }
        if bucket.tokens >= requested {
            bucket.tokens -= requested;
            Admission::Granted
        } else {
            Admission::Wait(bucket.deficit_wait(requested))
        }
    }

    /// Recalibrate the bucket from server-reported quota headers.
    ///
    /// The server is authoritative: a reported limit replaces the capacity and
    /// a reported remaining count replaces the token count. Counts a rate limit
    /// warning when `remaining / limit < warn_threshold`. Returns the parsed
    /// headers so callers can also act on the retry hint.
    #[instrument(skip(self, headers))]
    pub fn update_from_headers<H: HeaderSource + ?Sized>(
        &self,
        headers: &H,
        warn_threshold: f64,
    ) -> QuotaHeaders {
        let quota = QuotaHeaders::from_headers(headers, &self.header_names);
        self.update_from_quota(&quota, warn_threshold);
        quota
    }

    /// Recalibrate from already-parsed quota fields.
    pub fn update_from_quota(&self, quota: &QuotaHeaders, warn_threshold: f64) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.bucket.refill(now);

        match quota.limit {
            Some(0) => debug!("Ignoring zero quota limit from server"),
            Some(limit) => inner.bucket.capacity = limit as f64,
            None => {}
        }
        if let Some(remaining) = quota.remaining {
            inner.bucket.tokens = remaining as f64;
        }
        inner.bucket.tokens = inner.bucket.tokens.clamp(0.0, inner.bucket.capacity);

        debug!(
            tokens = inner.bucket.tokens,
            capacity = inner.bucket.capacity,
            "Recalibrated bucket from server quota"
        );

        if let Some(fraction) = quota.remaining_fraction()
            && fraction < warn_threshold
        {
            inner.stats.record_warning();
            warn!(
                remaining = quota.remaining,
                limit = quota.limit,
                "Server quota running low"
            );
        }
    }

    /// Current counters. Does not touch the bucket.
    pub fn stats(&self) -> LimiterStats {
        self.inner.lock().stats
    }

    /// Clear all counters.
    pub fn reset_stats(&self) {
        debug!("Resetting limiter statistics");
        self.inner.lock().stats = LimiterStats::default();
    }

    /// Tokens available right now, after refill.
    pub fn available_tokens(&self) -> f64 {
        let mut inner = self.inner.lock();
        inner.bucket.refill(Instant::now());
        inner.bucket.tokens
    }

    /// Maximum tokens the bucket can hold.
    pub fn capacity(&self) -> f64 {
        self.inner.lock().bucket.capacity
    }

    /// Configured steady-state rate.
    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    /// How long until `tokens` could be acquired, without taking them.
    ///
    /// Returns `None` if the request exceeds the bucket capacity.
    pub fn time_until_available(&self, tokens: u32) -> Option<Duration> {
        let mut inner = self.inner.lock();
        inner.bucket.refill(Instant::now());
        let requested = f64::from(tokens);
        (requested <= inner.bucket.capacity).then(|| inner.bucket.deficit_wait(requested))
    }
}
