//! End-to-end checks of the operator binary.

use std::path::Path;
use std::process::{Command, Output};

fn tollgate(dir: &Path, args: &[&str]) -> Output {
    let config = dir.join("tollgate.toml");
    if !config.exists() {
        std::fs::write(&config, "[retry]\nbase_delay_secs = 1.0\nmax_delay_secs = 60.0\n")
            .expect("write config");
    }

    Command::new(env!("CARGO_BIN_EXE_tollgate"))
        .arg("--config")
        .arg(&config)
        .arg("--state-dir")
        .arg(dir.join("state"))
        .args(["--limit", "3"])
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("run tollgate")
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn test_acquire_status_reset_cycle() {
    let dir = tempfile::tempdir().expect("temp dir");

    let fresh = tollgate(dir.path(), &["status"]);
    assert!(fresh.status.success());
    assert_eq!(json(&fresh)["available"], 3);

    let acquired = tollgate(dir.path(), &["acquire", "--count", "5", "--timeout-ms", "0"]);
    assert!(acquired.status.success());
    let report = json(&acquired);
    assert_eq!(report["granted"], 3);
    assert_eq!(report["denied"], 2);

    let full = json(&tollgate(dir.path(), &["status"]));
    assert_eq!(full["requests_last_window"], 3);
    assert_eq!(full["utilization_percent"], 100.0);

    assert!(tollgate(dir.path(), &["reset"]).status.success());
    assert_eq!(json(&tollgate(dir.path(), &["status"]))["available"], 3);
}

#[test]
fn test_health_reports_corrupt_state() {
    let dir = tempfile::tempdir().expect("temp dir");
    assert!(tollgate(dir.path(), &["health"]).status.success());

    std::fs::write(dir.path().join("state").join("quota_state.json"), "garbage")
        .expect("corrupt state");
    let output = tollgate(dir.path(), &["health"]);
    assert!(!output.status.success());
    let report = json(&output);
    assert_eq!(report["healthy"], false);
    assert!(!report["warnings"].as_array().expect("warnings").is_empty());
}

#[test]
fn test_backoff_command() {
    let dir = tempfile::tempdir().expect("temp dir");

    let computed = json(&tollgate(dir.path(), &["backoff", "--attempt", "3", "--no-jitter"]));
    assert_eq!(computed["delay_seconds"], 8.0);
    assert_eq!(computed["source"], "backoff");

    let hinted = json(&tollgate(
        dir.path(),
        &["backoff", "--attempt", "9", "--retry-after", "120"],
    ));
    assert_eq!(hinted["delay_seconds"], 120.0);
    assert_eq!(hinted["source"], "retry_after");

    let exhausted = json(&tollgate(dir.path(), &["backoff", "--attempt", "9"]));
    assert!(exhausted["delay_seconds"].is_null());
    assert_eq!(exhausted["source"], "exhausted");
}
