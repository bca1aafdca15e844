//! Admission control for quota-limited external services.
//!
//! Two limiters cover the two concurrency regimes a client population runs in:
//!
//! - [`TokenBucketLimiter`] serializes threads inside one process and smooths
//!   bursts. It recalibrates itself from quota headers returned by the server.
//! - [`CrossProcessLimiter`] makes independently launched processes share one
//!   sliding-window quota through a lock-protected state file.
//!
//! [`RetryPolicy`] computes how long to wait after a failed call, preferring
//! server retry hints over exponential backoff.
//!
//! ## Configuration
//!
//! Limits come from [`TollgateConfig::load`], which layers the bundled
//! `tollgate.toml`, user files and `TOLLGATE__*` environment variables:
//!
//! ```ignore
//! use tollgate_rate_limit::{CrossProcessLimiter, TollgateConfig};
//!
//! let config = TollgateConfig::load()?;
//! let shared = CrossProcessLimiter::from_config(&config)?;
//! if shared.acquire_default()? {
//!     // call the API
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bucket;
mod config;
mod headers;
mod retry;
mod scope;
mod shared;
mod stats;
mod tier;

pub use bucket::TokenBucketLimiter;
pub use config::{LimitsConfig, RetryConfig, SharedConfig, TollgateConfig};
pub use headers::{HeaderNames, HeaderSource, QuotaHeaders};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, RetryContext, RetryPolicy,
    RetryPolicyBuilder, calculate_backoff, parse_retry_after,
};
pub use scope::{Limiter, RateLimitScope, rate_limited, with_rate_limit};
pub use shared::{
    CrossProcessLimiter, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL,
    DEFAULT_SKEW_TOLERANCE, HealthReport, LOCK_FILE_NAME, QuotaStatus, STATE_FILE_NAME,
    SharedQuotaState,
};
pub use stats::LimiterStats;
pub use tier::ApiTier;
