//! Cross-process limiter over a lock-protected sliding window.
//!
//! Independently launched processes on one host share a state file holding
//! the timestamps of admitted calls. Each `acquire` runs one short critical
//! section under an exclusive file lock:
//!
//! 1. take the lock (bounded by the per-attempt lock timeout)
//! 2. read the state; missing or corrupt files count as an empty window
//! 3. prune entries older than the window
//! 4. if there is room, append `now` and write back atomically
//! 5. release the lock; when full, sleep briefly and go again until the
//!    caller's timeout runs out
//!
//! There is no fairness queue: whichever process wins the lock goes first.

use super::lock::{self, LockAttempt, QuotaLock};
use super::state::{LoadedState, SharedQuotaState, unix_now};
use super::status::{HealthReport, QuotaStatus};
use crate::{TokenBucketLimiter, TollgateConfig};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tollgate_error::{
    ConfigError, StorageError, StorageErrorKind, TollgateErrorKind, TollgateResult,
};
use tracing::{debug, info, instrument, warn};

/// File holding the shared request log.
pub const STATE_FILE_NAME: &str = "quota_state.json";

/// Sentinel file the advisory lock is taken on.
pub const LOCK_FILE_NAME: &str = "quota_state.lock";

/// Default bound on a blocking `acquire`.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default per-attempt bound on waiting for the file lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default sleep between attempts while the window is full.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default tolerated disagreement between process clocks.
pub const DEFAULT_SKEW_TOLERANCE: Duration = Duration::from_secs(5);

/// Outcome of one critical section.
enum Slot {
    Recorded,
    Full,
    LockBusy,
}

/// Limiter enforcing one quota across independent processes.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use tollgate_rate_limit::CrossProcessLimiter;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = CrossProcessLimiter::new("/tmp/tollgate", 240, 60)?;
/// if limiter.acquire(Duration::from_secs(5))? {
///     // make the quota-limited call
/// }
/// println!("{:?}", limiter.status()?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CrossProcessLimiter {
    state_path: PathBuf,
    lock_path: PathBuf,
    limit: u32,
    window_seconds: u64,
    acquire_timeout: Duration,
    lock_timeout: Duration,
    poll_interval: Duration,
    skew_tolerance: Duration,
    identity: String,
    local: Option<TokenBucketLimiter>,
}

impl CrossProcessLimiter {
    /// Create a limiter sharing `limit` calls per `window_seconds` with every
    /// process using the same `state_dir`.
    ///
    /// Creates the directory and the lock file if needed; the state file is
    /// created by the first successful `acquire`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero limit or window, and a
    /// storage error if the directory or lock file cannot be created.
    #[instrument(skip(state_dir), fields(state_dir = %state_dir.as_ref().display()))]
    pub fn new(state_dir: impl AsRef<Path>, limit: u32, window_seconds: u64) -> TollgateResult<Self> {
        if limit == 0 {
            Err(ConfigError::new("shared limit must be positive"))?
        }
        if window_seconds == 0 {
            Err(ConfigError::new("window_seconds must be positive"))?
        }

        let state_dir = state_dir.as_ref();
        std::fs::create_dir_all(state_dir).map_err(|e| {
            StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                "{}: {}",
                state_dir.display(),
                e
            )))
        })?;

        let lock_path = state_dir.join(LOCK_FILE_NAME);
        lock::ensure_lock_file(&lock_path)?;

        debug!(limit, window_seconds, "Creating cross-process limiter");
        Ok(Self {
            state_path: state_dir.join(STATE_FILE_NAME),
            lock_path,
            limit,
            window_seconds,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            skew_tolerance: DEFAULT_SKEW_TOLERANCE,
            identity: format!("pid-{}", std::process::id()),
            local: None,
        })
    }

    /// Create a limiter from the `[shared]` and `[limits]` configuration sections.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the state
    /// directory cannot be prepared.
    pub fn from_config(config: &TollgateConfig) -> TollgateResult<Self> {
        config.shared.validate()?;
        let shared = &config.shared;
        let limiter = Self::new(
            shared.resolved_state_dir(),
            config.shared_limit(),
            shared.window_seconds,
        )?
        .with_acquire_timeout(shared.acquire_timeout()?)
        .with_lock_timeout(shared.lock_timeout()?)
        .with_poll_interval(shared.poll_interval())
        .with_skew_tolerance(shared.skew_tolerance()?);

        match shared.local_burst {
            Some(burst) => limiter.with_local_burst(config.limits.resolved_requests_per_minute(), burst),
            None => Ok(limiter),
        }
    }

    /// Default timeout used by [`acquire_default`](Self::acquire_default).
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Bound on waiting for the file lock in one attempt.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sleep between attempts while the window is full.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Clock disagreement tolerated before health checks complain.
    pub fn with_skew_tolerance(mut self, tolerance: Duration) -> Self {
        self.skew_tolerance = tolerance;
        self
    }

    /// Name recorded as `lastWriterIdentity`.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Smooth this process's bursts through a local token bucket before
    /// touching shared state. The shared window stays authoritative.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero rate or burst.
    pub fn with_local_burst(mut self, requests_per_minute: u32, burst: u32) -> TollgateResult<Self> {
        self.local = Some(TokenBucketLimiter::new(requests_per_minute, Some(burst))?);
        Ok(self)
    }

    /// Path of the shared state file.
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Path of the lock file.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Calls allowed per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length in seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Embedded per-process bucket, if configured.
    pub fn local_bucket(&self) -> Option<&TokenBucketLimiter> {
        self.local.as_ref()
    }

    /// Record one call in the shared window, retrying until `timeout`.
    ///
    /// Returns `Ok(false)` when no slot freed up in time; lock contention and
    /// corrupt state are handled internally and never surface as errors.
    ///
    /// # Errors
    ///
    /// Returns a platform error if advisory locking is unavailable, or a
    /// storage error if the state file cannot be written.
    #[instrument(skip(self), fields(limit = self.limit))]
    pub fn acquire(&self, timeout: Duration) -> TollgateResult<bool> {
        let started = Instant::now();

        if let Some(local) = &self.local
            && !local.acquire(1, Some(timeout))
        {
            debug!("Local burst bucket timed out");
            return Ok(false);
        }

        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            match self.record_once(self.lock_timeout.min(remaining))? {
                Slot::Recorded => {
                    debug!(waited_secs = started.elapsed().as_secs_f64(), "Slot recorded");
                    return Ok(true);
                }
                Slot::Full => debug!("Shared window full"),
                Slot::LockBusy => warn!(
                    lock = %self.lock_path.display(),
                    "Quota lock busy past per-attempt deadline, retrying"
                ),
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                debug!("Timed out waiting for shared slot");
                return Ok(false);
            }
            std::thread::sleep(self.poll_interval.min(remaining));
        }
    }

    /// [`acquire`](Self::acquire) with the configured default timeout.
    ///
    /// # Errors
    ///
    /// See [`acquire`](Self::acquire).
    pub fn acquire_default(&self) -> TollgateResult<bool> {
        self.acquire(self.acquire_timeout)
    }

    fn record_once(&self, lock_deadline: Duration) -> TollgateResult<Slot> {
        let _guard = match self.lock(lock_deadline)? {
            Some(guard) => guard,
            None => return Ok(Slot::LockBusy),
        };

        let now = unix_now();
        let mut state = self.load_state();
        state.prune(now);

        if state.len() >= self.limit as usize {
            return Ok(Slot::Full);
        }

        state.record(now, &self.identity);
        state.write_atomic(&self.state_path)?;
        Ok(Slot::Recorded)
    }

    fn lock(&self, deadline: Duration) -> TollgateResult<Option<QuotaLock>> {
        Ok(match lock::acquire(&self.lock_path, deadline)? {
            LockAttempt::Acquired(guard) => Some(guard),
            LockAttempt::Busy => None,
        })
    }

    /// Read the state under the lock, healing missing or corrupt files to an
    /// empty window carrying this limiter's configuration.
    fn load_state(&self) -> SharedQuotaState {
        match SharedQuotaState::read(&self.state_path) {
            LoadedState::Loaded(mut state) => {
                if state.limit != self.limit || state.window_seconds != self.window_seconds {
                    debug!(
                        file_limit = state.limit,
                        file_window = state.window_seconds,
                        "State file written with different limits, using ours"
                    );
                    state.limit = self.limit;
                    state.window_seconds = self.window_seconds;
                }
                state
            }
            LoadedState::Missing => {
                debug!(path = %self.state_path.display(), "No state file yet, starting empty window");
                SharedQuotaState::empty(self.limit, self.window_seconds)
            }
            LoadedState::Corrupt(reason) => {
                warn!(
                    path = %self.state_path.display(),
                    reason = %reason,
                    "Corrupted quota state, resetting to empty window"
                );
                SharedQuotaState::empty(self.limit, self.window_seconds)
            }
        }
    }

    /// Snapshot of the shared window. Does not consume a slot or write.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lock stays busy past the lock timeout,
    /// and a platform error if advisory locking is unavailable.
    #[instrument(skip(self))]
    pub fn status(&self) -> TollgateResult<QuotaStatus> {
        let _guard = self.lock(self.lock_timeout)?.ok_or_else(|| {
            StorageError::new(StorageErrorKind::LockBusy(self.lock_path.display().to_string()))
        })?;

        let now = unix_now();
        let mut state = self.load_state();
        state.prune(now);

        let used = state.len();
        let limit = self.limit as usize;
        Ok(QuotaStatus {
            limit: self.limit,
            window_seconds: self.window_seconds,
            requests_last_window: used,
            available: limit.saturating_sub(used),
            utilization_percent: used as f64 / f64::from(self.limit) * 100.0,
            oldest_request_age_seconds: state.oldest().map(|oldest| (now - oldest).max(0.0)),
        })
    }

    /// Inspect lock, state file and clocks. Never fails; every problem becomes
    /// a warning in the report.
    #[instrument(skip(self))]
    pub fn health_check(&self) -> HealthReport {
        let mut warnings = Vec::new();

        let dir = self.state_path.parent().unwrap_or_else(|| Path::new("."));
        if !dir.is_dir() {
            warnings.push(format!("state directory {} does not exist", dir.display()));
        }

        match self.lock(self.lock_timeout) {
            Ok(Some(_guard)) => self.inspect_state(&mut warnings),
            Ok(None) => warnings.push(format!(
                "lock {} held for more than {:.1}s; a holder may be stuck or the lock stale",
                self.lock_path.display(),
                self.lock_timeout.as_secs_f64()
            )),
            Err(e) => match e.kind() {
                TollgateErrorKind::Platform(platform) => warnings.push(format!(
                    "advisory locking unavailable, processes cannot coordinate: {}",
                    platform.message
                )),
                _ => warnings.push(format!("lock file unusable: {}", e)),
            },
        }

        for warning in &warnings {
            warn!(warning = %warning, "Quota health check finding");
        }
        if warnings.is_empty() {
            debug!("Quota health check passed");
        }
        HealthReport::from_warnings(warnings)
    }

    fn inspect_state(&self, warnings: &mut Vec<String>) {
        let mut state = match SharedQuotaState::read(&self.state_path) {
            LoadedState::Missing => return,
            LoadedState::Corrupt(reason) => {
                warnings.push(format!(
                    "state file {} corrupted ({}); it will be reset on next acquire",
                    self.state_path.display(),
                    reason
                ));
                return;
            }
            LoadedState::Loaded(state) => state,
        };

        let now = unix_now();
        let tolerance = self.skew_tolerance.as_secs_f64();

        let writer_ahead = state.last_writer_instant - now;
        if writer_ahead > tolerance {
            warnings.push(format!(
                "last writer {} clock is {:.1}s ahead of this host",
                state.last_writer_identity, writer_ahead
            ));
        }

        if let Some(newest) = state.newest()
            && newest - now > tolerance
        {
            warnings.push(format!(
                "request log contains entries {:.1}s in the future",
                newest - now
            ));
        }

        if state.last_writer_instant > 0.0
            && let Ok(modified) = std::fs::metadata(&self.state_path).and_then(|m| m.modified())
            && let Ok(since_epoch) = modified.duration_since(std::time::UNIX_EPOCH)
        {
            let drift = (since_epoch.as_secs_f64() - state.last_writer_instant).abs();
            if drift > tolerance {
                warnings.push(format!(
                    "state file timestamp disagrees with writer clock by {:.1}s",
                    drift
                ));
            }
        }

        if state.limit != self.limit || state.window_seconds != self.window_seconds {
            warnings.push(format!(
                "state file written with limit {} per {}s, this process uses {} per {}s",
                state.limit, state.window_seconds, self.limit, self.window_seconds
            ));
        }

        state.window_seconds = self.window_seconds;
        state.prune(now);
        if state.len() > self.limit as usize {
            warnings.push(format!(
                "window holds {} requests, above the limit of {}",
                state.len(),
                self.limit
            ));
        }
    }

    /// Clear the shared window. Operator escape hatch for stuck state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lock stays busy or the empty state
    /// cannot be written.
    #[instrument(skip(self))]
    pub fn reset(&self) -> TollgateResult<()> {
        let _guard = self.lock(self.lock_timeout)?.ok_or_else(|| {
            StorageError::new(StorageErrorKind::LockBusy(self.lock_path.display().to_string()))
        })?;

        let mut state = SharedQuotaState::empty(self.limit, self.window_seconds);
        state.last_writer_instant = unix_now();
        state.last_writer_identity = self.identity.clone();
        state.write_atomic(&self.state_path)?;

        info!(path = %self.state_path.display(), "Shared quota state reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(dir: &Path, limit: u32) -> CrossProcessLimiter {
        CrossProcessLimiter::new(dir, limit, 60)
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_rejects_zero_limit_and_window() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CrossProcessLimiter::new(dir.path(), 0, 60).is_err());
        assert!(CrossProcessLimiter::new(dir.path(), 10, 0).is_err());
    }

    #[test]
    fn test_fills_window_then_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter(dir.path(), 3);

        for _ in 0..3 {
            assert!(limiter.acquire(Duration::ZERO).unwrap());
        }
        let started = Instant::now();
        assert!(!limiter.acquire(Duration::from_millis(50)).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_expired_entries_free_slots() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter(dir.path(), 2);

        let mut old = SharedQuotaState::empty(2, 60);
        old.request_log = vec![unix_now() - 120.0, unix_now() - 61.0];
        old.write_atomic(limiter.state_path()).unwrap();

        assert!(limiter.acquire(Duration::ZERO).unwrap());
        assert!(limiter.acquire(Duration::ZERO).unwrap());
        assert_eq!(limiter.status().unwrap().requests_last_window, 2);
    }

    #[test]
    fn test_future_entry_does_not_shift_new_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter(dir.path(), 3);

        let ahead = unix_now() + 3600.0;
        let mut skewed = SharedQuotaState::empty(3, 60);
        skewed.request_log = vec![ahead];
        skewed.write_atomic(limiter.state_path()).unwrap();

        assert!(limiter.acquire(Duration::ZERO).unwrap());
        assert!(limiter.acquire(Duration::ZERO).unwrap());

        match SharedQuotaState::read(limiter.state_path()) {
            LoadedState::Loaded(state) => {
                assert_eq!(state.request_log.len(), 3);
                let fresh: Vec<f64> = state.request_log.iter().copied().filter(|&s| s < ahead - 1.0).collect();
                assert_eq!(fresh.len(), 2);
                assert!(fresh.iter().all(|&stamp| stamp < unix_now() + 10.0));
            }
            other => panic!("expected state, got {:?}", other),
        }
    }

    #[test]
    fn test_local_burst_gates_before_shared_state() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter(dir.path(), 10).with_local_burst(1, 1).unwrap();

        assert!(limiter.acquire(Duration::ZERO).unwrap());
        assert!(!limiter.acquire(Duration::ZERO).unwrap());
        assert_eq!(limiter.status().unwrap().requests_last_window, 1);
    }

    #[test]
    fn test_identity_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = limiter(dir.path(), 5).with_identity("worker-7");
        assert!(limiter.acquire(Duration::ZERO).unwrap());

        match SharedQuotaState::read(limiter.state_path()) {
            LoadedState::Loaded(state) => assert_eq!(state.last_writer_identity, "worker-7"),
            other => panic!("expected state, got {:?}", other),
        }
    }
}
