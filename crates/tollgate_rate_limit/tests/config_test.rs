//! Integration tests for configuration loading.

use std::io::Write;
use std::time::Duration;
use tollgate_rate_limit::{
    ApiTier, CrossProcessLimiter, RetryPolicy, TokenBucketLimiter, TollgateConfig,
};

#[test]
fn test_bundled_defaults() {
    let config = TollgateConfig::load().expect("bundled config loads");

    assert_eq!(config.shared.window_seconds, 60);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.headers.retry_after, "retry-after");
    assert!((config.limits.warn_threshold - 0.1).abs() < f64::EPSILON);
}

#[test]
fn test_from_file_builds_every_component() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("tollgate.toml");
    let mut file = std::fs::File::create(&path).expect("create config");
    write!(
        file,
        r#"
[limits]
has_api_key = true
burst_capacity = 12

[shared]
state_dir = "{}"
limit = 30
window_seconds = 10
poll_interval_ms = 20

[retry]
base_delay_secs = 0.5
max_delay_secs = 4.0
max_attempts = 3
jitter = false

[headers]
remaining = "ratelimit-remaining"
"#,
        dir.path().join("state").display()
    )
    .expect("write config");

    let config = TollgateConfig::from_file(&path).expect("config parses");
    assert_eq!(config.limits.tier(), ApiTier::Keyed);
    assert_eq!(config.shared_limit(), 30);
    assert_eq!(config.headers.remaining, "ratelimit-remaining");
    assert_eq!(config.headers.limit, "x-ratelimit-limit");

    let bucket = TokenBucketLimiter::from_config(&config).expect("bucket");
    assert_eq!(bucket.requests_per_minute(), 240);
    assert_eq!(bucket.capacity(), 12.0);

    let shared = CrossProcessLimiter::from_config(&config).expect("shared limiter");
    assert_eq!(shared.limit(), 30);
    assert_eq!(shared.window_seconds(), 10);
    assert!(shared.state_path().starts_with(dir.path().join("state")));

    let policy = RetryPolicy::from_config(&config.retry, &config.headers).expect("policy");
    assert_eq!(policy.retry_delay(1, None), Some(Duration::from_secs(1)));
    assert_eq!(policy.retry_delay(3, None), None);
}

#[test]
fn test_invalid_limits_are_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[shared]\nwindow_seconds = 0\n").expect("write config");
    assert!(TollgateConfig::from_file(&path).is_err());

    std::fs::write(&path, "[retry]\nbase_delay_secs = 10.0\nmax_delay_secs = 1.0\n")
        .expect("write config");
    assert!(TollgateConfig::from_file(&path).is_err());

    std::fs::write(&path, "[shared]\nacquire_timeout_secs = 1e30\n").expect("write config");
    assert!(TollgateConfig::from_file(&path).is_err());

    std::fs::write(&path, "[retry]\nmax_delay_secs = 1e30\n").expect("write config");
    assert!(TollgateConfig::from_file(&path).is_err());
}

#[test]
fn test_out_of_range_timeout_is_an_error_not_a_panic() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = TollgateConfig::default();
    config.shared.state_dir = Some(dir.path().to_path_buf());
    config.shared.lock_timeout_secs = 1e30;

    assert!(CrossProcessLimiter::from_config(&config).is_err());
    assert!(RetryPolicy::from_config(
        &tollgate_rate_limit::RetryConfig {
            base_delay_secs: f64::INFINITY,
            ..Default::default()
        },
        &config.headers
    )
    .is_err());
}
