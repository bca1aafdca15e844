//! Tollgate - admission control for quota-limited external services
//!
//! Tollgate keeps a client population under an external API's request quota
//! in two concurrency regimes:
//!
//! - **Threads in one process** share a [`TokenBucketLimiter`], which smooths
//!   bursts and recalibrates from the server's quota headers.
//! - **Independent processes on one host** share a [`CrossProcessLimiter`],
//!   a sliding-window log guarded by an advisory file lock.
//!
//! Failed calls are spaced out by a [`RetryPolicy`] that honours server
//! `Retry-After` hints before falling back to exponential backoff.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tollgate::{CrossProcessLimiter, TollgateConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TollgateConfig::load()?;
//!     let limiter = CrossProcessLimiter::from_config(&config)?;
//!
//!     if limiter.acquire(Duration::from_secs(10))? {
//!         // call the API
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `tollgate_error` - Error types
//! - `tollgate_rate_limit` - Limiters, retry policy, configuration
//!
//! This crate re-exports both and ships the `tollgate` operator binary.

pub use tollgate_error::*;
pub use tollgate_rate_limit::*;

pub mod telemetry;
