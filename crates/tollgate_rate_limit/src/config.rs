//! Configuration structures for quota admission.
//!
//! This module provides TOML-based configuration. Sources are layered:
//! - Bundled defaults (include_str! from tollgate.toml)
//! - User overrides (~/.config/tollgate/tollgate.toml, then ./tollgate.toml)
//! - Environment variables (`TOLLGATE__SHARED__LIMIT=240`)
//!
//! Later sources take precedence. Numeric limits are validated after loading;
//! nonsensical values are configuration errors, raised before any limiter is built.

use crate::{ApiTier, HeaderNames};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tollgate_error::{ConfigError, TollgateError, TollgateResult};
use tracing::{debug, instrument};

/// Steady-state rate and burst for the token bucket.
///
/// # Example
///
/// ```toml
/// [limits]
/// has_api_key = true        # 240 rpm preset
/// burst_capacity = 20
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Explicit requests per minute (overrides the tier preset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,

    /// Whether an API key is configured; selects the tier preset
    pub has_api_key: bool,

    /// Maximum tokens the bucket may accumulate (defaults to the rate)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst_capacity: Option<u32>,

    /// Remaining-quota fraction below which header updates count a warning
    pub warn_threshold: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: None,
            has_api_key: false,
            burst_capacity: None,
            warn_threshold: 0.1,
        }
    }
}

impl LimitsConfig {
    /// Tier implied by `has_api_key`.
    pub fn tier(&self) -> ApiTier {
        ApiTier::from_api_key(self.has_api_key)
    }

    /// Explicit rate, or the tier preset.
    pub fn resolved_requests_per_minute(&self) -> u32 {
        self.requests_per_minute
            .unwrap_or_else(|| self.tier().requests_per_minute())
    }

    /// Explicit burst, or the resolved rate.
    pub fn resolved_burst_capacity(&self) -> u32 {
        self.burst_capacity
            .unwrap_or_else(|| self.resolved_requests_per_minute())
    }

    /// Reject limits no limiter can honour.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero rate or burst, or a warning
    /// threshold outside `(0, 1]`.
    pub fn validate(&self) -> TollgateResult<()> {
        if self.requests_per_minute == Some(0) {
            Err(ConfigError::new("limits.requests_per_minute must be positive"))?
        }
        if self.burst_capacity == Some(0) {
            Err(ConfigError::new("limits.burst_capacity must be positive"))?
        }
        if !(self.warn_threshold > 0.0 && self.warn_threshold <= 1.0) {
            Err(ConfigError::new(format!(
                "limits.warn_threshold must be in (0, 1], got {}",
                self.warn_threshold
            )))?
        }
        Ok(())
    }
}

/// Cross-process sliding window settings.
///
/// # Example
///
/// ```toml
/// [shared]
/// state_dir = "/var/lib/tollgate"
/// limit = 240
/// window_seconds = 60
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SharedConfig {
    /// Directory holding the state and lock files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Calls allowed per window across all processes (defaults to the rate)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Sliding window length
    pub window_seconds: u64,

    /// Default `acquire` timeout
    pub acquire_timeout_secs: f64,

    /// Per-attempt bound on waiting for the file lock
    pub lock_timeout_secs: f64,

    /// Sleep between attempts while the window is full
    pub poll_interval_ms: u64,

    /// Optional per-process bucket smoothing bursts before touching shared state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_burst: Option<u32>,

    /// Clock disagreement tolerated before health checks complain
    pub skew_tolerance_secs: f64,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            limit: None,
            window_seconds: 60,
            acquire_timeout_secs: 120.0,
            lock_timeout_secs: 5.0,
            poll_interval_ms: 100,
            local_burst: None,
            skew_tolerance_secs: 5.0,
        }
    }
}

impl SharedConfig {
    /// Configured state directory, or `~/.config/tollgate`.
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(".config/tollgate"))
                .unwrap_or_else(|| std::env::temp_dir().join("tollgate"))
        })
    }

    /// Default acquire timeout as a duration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the value is negative, non-finite or
    /// too large to represent.
    pub fn acquire_timeout(&self) -> TollgateResult<Duration> {
        secs_to_duration("shared.acquire_timeout_secs", self.acquire_timeout_secs)
    }

    /// Per-attempt lock deadline as a duration.
    ///
    /// # Errors
    ///
    /// See [`acquire_timeout`](Self::acquire_timeout).
    pub fn lock_timeout(&self) -> TollgateResult<Duration> {
        secs_to_duration("shared.lock_timeout_secs", self.lock_timeout_secs)
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Skew tolerance as a duration.
    ///
    /// # Errors
    ///
    /// See [`acquire_timeout`](Self::acquire_timeout).
    pub fn skew_tolerance(&self) -> TollgateResult<Duration> {
        secs_to_duration("shared.skew_tolerance_secs", self.skew_tolerance_secs)
    }

    /// Reject windows and timeouts no limiter can honour.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero window or limit, or durations
    /// that are negative, non-finite or out of range.
    pub fn validate(&self) -> TollgateResult<()> {
        if self.window_seconds == 0 {
            Err(ConfigError::new("shared.window_seconds must be positive"))?
        }
        if self.limit == Some(0) {
            Err(ConfigError::new("shared.limit must be positive"))?
        }
        if self.local_burst == Some(0) {
            Err(ConfigError::new("shared.local_burst must be positive"))?
        }
        self.acquire_timeout()?;
        self.lock_timeout()?;
        self.skew_tolerance()?;
        Ok(())
    }
}

/// Backoff policy settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First backoff step in seconds
    pub base_delay_secs: f64,
    /// Backoff ceiling in seconds
    pub max_delay_secs: f64,
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Full jitter on computed backoff
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 1.0,
            max_delay_secs: 60.0,
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Reject delays no policy can honour.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for negative, non-finite, out-of-range or
    /// inverted delays.
    pub fn validate(&self) -> TollgateResult<()> {
        if self.max_delay()? < self.base_delay()? {
            Err(ConfigError::new(
                "retry.max_delay_secs must not be smaller than retry.base_delay_secs",
            ))?
        }
        Ok(())
    }

    /// First backoff step as a duration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the value is negative, non-finite or
    /// too large to represent.
    pub fn base_delay(&self) -> TollgateResult<Duration> {
        secs_to_duration("retry.base_delay_secs", self.base_delay_secs)
    }

    /// Backoff ceiling as a duration.
    ///
    /// # Errors
    ///
    /// See [`base_delay`](Self::base_delay).
    pub fn max_delay(&self) -> TollgateResult<Duration> {
        secs_to_duration("retry.max_delay_secs", self.max_delay_secs)
    }
}

/// Convert configured seconds, rejecting values no `Duration` can hold.
fn secs_to_duration(name: &str, secs: f64) -> TollgateResult<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        ConfigError::new(format!(
            "{} must be a non-negative number of seconds within range, got {} ({})",
            name, secs, e
        ))
        .into()
    })
}

/// Top-level Tollgate configuration.
///
/// # Example
///
/// ```no_run
/// use tollgate_rate_limit::TollgateConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TollgateConfig::load()?;
/// println!("rpm: {}", config.limits.resolved_requests_per_minute());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TollgateConfig {
    /// Token bucket limits
    pub limits: LimitsConfig,
    /// Cross-process window settings
    pub shared: SharedConfig,
    /// Backoff policy
    pub retry: RetryConfig,
    /// Quota header names
    pub headers: HeaderNames,
}

impl TollgateConfig {
    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> TollgateResult<Self> {
        debug!("Loading configuration from file");

        let config: Self = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .map_err(|e| {
                TollgateError::from(ConfigError::new(format!(
                    "Failed to read configuration from {}: {}",
                    path.as_ref().display(),
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                TollgateError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with precedence: environment > current dir > home dir > bundled defaults.
    ///
    /// User config files are optional and silently skipped if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if a present source cannot be parsed or the merged
    /// limits are invalid.
    #[instrument]
    pub fn load() -> TollgateResult<Self> {
        debug!("Loading configuration with precedence: env > current dir > home dir > bundled defaults");

        // Bundled default configuration
        const DEFAULT_CONFIG: &str = include_str!("../../../tollgate.toml");

        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        // Add user config from home directory (optional)
        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config/tollgate/tollgate.toml");
            builder = builder.add_source(File::from(home_config).required(false));
        }

        // Add user config from current directory (optional)
        builder = builder.add_source(File::with_name("tollgate").required(false));

        // Environment overrides, e.g. TOLLGATE__LIMITS__HAS_API_KEY=true
        builder = builder.add_source(
            Environment::with_prefix("TOLLGATE")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .map_err(|e| {
                TollgateError::from(ConfigError::new(format!(
                    "Failed to build configuration: {}",
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                TollgateError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn validate(&self) -> TollgateResult<()> {
        self.limits.validate()?;
        self.shared.validate()?;
        self.retry.validate()
    }

    /// Shared window limit, defaulting to the resolved request rate.
    pub fn shared_limit(&self) -> u32 {
        self.shared
            .limit
            .unwrap_or_else(|| self.limits.resolved_requests_per_minute())
    }
}
