//! Integration tests for the shared sliding window.
//!
//! Advisory locks belong to open file handles, so separate limiter instances
//! on different threads contend exactly like separate processes do.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tollgate_rate_limit::{CrossProcessLimiter, SharedQuotaState};

fn limiter(dir: &std::path::Path, limit: u32) -> CrossProcessLimiter {
    CrossProcessLimiter::new(dir, limit, 60)
        .expect("valid limits")
        .with_poll_interval(Duration::from_millis(5))
        .with_lock_timeout(Duration::from_millis(500))
}

#[test]
fn test_independent_instances_share_one_ceiling() {
    let dir = tempfile::tempdir().expect("temp dir");
    let dir = Arc::new(dir.path().to_path_buf());

    let handles: Vec<_> = (0..3)
        .map(|worker| {
            let dir = Arc::clone(&dir);
            thread::spawn(move || {
                let limiter = limiter(&dir, 24).with_identity(format!("worker-{}", worker));
                (0..15)
                    .filter(|_| {
                        limiter
                            .acquire(Duration::from_millis(500))
                            .expect("acquire should not error")
                    })
                    .count()
            })
        })
        .collect();

    let total: usize = handles
        .into_iter()
        .map(|h| h.join().expect("worker panicked"))
        .sum();
    assert_eq!(total, 24, "exactly the shared limit should be granted");

    let status = limiter(&dir, 24).status().expect("status");
    assert_eq!(status.requests_last_window, 24);
    assert_eq!(status.available, 0);
    assert_eq!(status.utilization_percent, 100.0);
}

#[test]
fn test_corrupt_state_is_treated_as_empty() {
    let dir = tempfile::tempdir().expect("temp dir");
    let limiter = limiter(dir.path(), 2);
    fs::write(limiter.state_path(), "{\"requestLog\": [1, 2,").expect("write garbage");

    let report = limiter.health_check();
    assert!(!*report.healthy());
    assert!(report.warnings().iter().any(|w| w.contains("corrupted")));

    assert!(limiter.acquire(Duration::ZERO).expect("acquire"));
    assert_eq!(limiter.status().expect("status").requests_last_window, 1);
    assert!(*limiter.health_check().healthy());
}

#[test]
fn test_reset_clears_window() {
    let dir = tempfile::tempdir().expect("temp dir");
    let limiter = limiter(dir.path(), 2);

    assert!(limiter.acquire(Duration::ZERO).expect("acquire"));
    assert!(limiter.acquire(Duration::ZERO).expect("acquire"));
    assert!(!limiter.acquire(Duration::ZERO).expect("acquire"));

    limiter.reset().expect("reset");
    assert_eq!(limiter.status().expect("status").requests_last_window, 0);
    assert!(limiter.acquire(Duration::ZERO).expect("acquire"));
}

#[test]
fn test_status_does_not_mutate_state() {
    let dir = tempfile::tempdir().expect("temp dir");
    let limiter = limiter(dir.path(), 5);
    assert!(limiter.acquire(Duration::ZERO).expect("acquire"));

    let before = fs::read(limiter.state_path()).expect("state file");
    let first = limiter.status().expect("status");
    let second = limiter.status().expect("status");
    let after = fs::read(limiter.state_path()).expect("state file");

    assert_eq!(before, after);
    assert_eq!(first.requests_last_window, second.requests_last_window);
    assert_eq!(first.available, second.available);
    assert_eq!(first.limit, second.limit);
}

#[test]
fn test_health_flags_future_entries_and_mismatched_limits() {
    let dir = tempfile::tempdir().expect("temp dir");
    let limiter = limiter(dir.path(), 5);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_secs_f64();
    let mut state = SharedQuotaState::empty(10, 30);
    state.request_log = vec![now + 600.0];
    state.last_writer_instant = now + 600.0;
    state.last_writer_identity = "pid-skewed".to_string();
    fs::write(
        limiter.state_path(),
        serde_json::to_string(&state).expect("serialize"),
    )
    .expect("write state");

    let report = limiter.health_check();
    assert!(!*report.healthy());
    let warnings = report.warnings().join("\n");
    assert!(warnings.contains("ahead"), "{}", warnings);
    assert!(warnings.contains("future"), "{}", warnings);
    assert!(warnings.contains("limit 10 per 30s"), "{}", warnings);
}

#[cfg(any(unix, windows))]
#[test]
fn test_busy_lock_times_out_as_denial() {
    let dir = tempfile::tempdir().expect("temp dir");
    let limiter = limiter(dir.path(), 5).with_lock_timeout(Duration::from_millis(20));

    let holder = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(limiter.lock_path())
        .expect("open lock file");
    fs2::FileExt::lock_exclusive(&holder).expect("hold lock");

    assert!(!limiter.acquire(Duration::from_millis(60)).expect("acquire"));
    assert!(limiter.status().is_err());
    assert!(!*limiter.health_check().healthy());

    fs2::FileExt::unlock(&holder).expect("release lock");
    assert!(limiter.acquire(Duration::ZERO).expect("acquire"));
}
