//! Command handlers. Every command prints one JSON document on stdout.

use super::commands::{Cli, Commands};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tollgate::{
    CrossProcessLimiter, HeaderSource, RetryPolicy, StorageError, StorageErrorKind, TollgateConfig,
    TollgateResult,
};
use tracing::{debug, info, instrument};

/// Outcome of `tollgate acquire`.
#[derive(Debug, Serialize)]
struct AcquireReport {
    requested: u32,
    granted: u32,
    denied: u32,
    elapsed_seconds: f64,
}

/// Outcome of `tollgate backoff`.
#[derive(Debug, Serialize)]
struct BackoffReport {
    attempt: u32,
    /// `None` when the policy gives up
    delay_seconds: Option<f64>,
    source: &'static str,
}

/// Run the requested command. Returns `false` when the command ran but the
/// outcome should fail the process (an unhealthy health check).
pub fn handle_command(cli: &Cli) -> TollgateResult<bool> {
    let config = resolve_config(cli)?;

    match &cli.command {
        Commands::Status => {
            let status = CrossProcessLimiter::from_config(&config)?.status()?;
            print_json(&status)?;
            Ok(true)
        }

        Commands::Health => {
            let report = CrossProcessLimiter::from_config(&config)?.health_check();
            print_json(&report)?;
            Ok(*report.healthy())
        }

        Commands::Reset => {
            CrossProcessLimiter::from_config(&config)?.reset()?;
            print_json(&serde_json::json!({ "reset": true }))?;
            Ok(true)
        }

        Commands::Acquire {
            count,
            timeout_ms,
            identity,
        } => {
            let mut limiter = CrossProcessLimiter::from_config(&config)?;
            if let Some(identity) = identity {
                limiter = limiter.with_identity(identity.clone());
            }
            let report = acquire_slots(&limiter, *count, Duration::from_millis(*timeout_ms))?;
            print_json(&report)?;
            Ok(true)
        }

        Commands::Backoff {
            attempt,
            retry_after,
            no_jitter,
        } => {
            let mut retry = config.retry.clone();
            if *no_jitter {
                retry.jitter = false;
            }
            let policy = RetryPolicy::from_config(&retry, &config.headers)?;
            print_json(&backoff(&policy, *attempt, retry_after.as_deref()))?;
            Ok(true)
        }
    }
}

/// Load configuration and apply command-line overrides.
fn resolve_config(cli: &Cli) -> TollgateResult<TollgateConfig> {
    let mut config = match &cli.config {
        Some(path) => TollgateConfig::from_file(path)?,
        None => TollgateConfig::load()?,
    };

    if let Some(dir) = &cli.state_dir {
        config.shared.state_dir = Some(dir.clone());
    }
    if let Some(limit) = cli.limit {
        config.shared.limit = Some(limit);
    }
    if let Some(window) = cli.window_seconds {
        config.shared.window_seconds = window;
    }

    config.validate()?;
    debug!(
        state_dir = %config.shared.resolved_state_dir().display(),
        limit = config.shared_limit(),
        window_seconds = config.shared.window_seconds,
        "Resolved configuration"
    );
    Ok(config)
}

#[instrument(skip(limiter))]
fn acquire_slots(
    limiter: &CrossProcessLimiter,
    count: u32,
    timeout: Duration,
) -> TollgateResult<AcquireReport> {
    let started = Instant::now();
    let mut granted = 0;
    for _ in 0..count {
        if limiter.acquire(timeout)? {
            granted += 1;
        }
    }

    info!(granted, denied = count - granted, "Acquire run finished");
    Ok(AcquireReport {
        requested: count,
        granted,
        denied: count - granted,
        elapsed_seconds: started.elapsed().as_secs_f64(),
    })
}

fn backoff(policy: &RetryPolicy, attempt: u32, retry_after: Option<&str>) -> BackoffReport {
    let headers: HashMap<&str, &str> = retry_after
        .map(|hint| (policy.header_names().retry_after.as_str(), hint))
        .into_iter()
        .collect();

    let source = if policy.retry_hint(&headers).is_some() {
        "retry_after"
    } else if attempt >= *policy.max_attempts() {
        "exhausted"
    } else {
        "backoff"
    };

    BackoffReport {
        attempt,
        delay_seconds: policy
            .retry_delay(attempt, Some(&headers as &dyn HeaderSource))
            .map(|delay| delay.as_secs_f64()),
        source,
    }
}

fn print_json<T: Serialize>(value: &T) -> TollgateResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| StorageError::new(StorageErrorKind::Serialization(e.to_string())))?;
    println!("{}", json);
    Ok(())
}
