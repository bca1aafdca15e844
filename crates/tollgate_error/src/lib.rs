//! Error types for the Tollgate library.
//!
//! This crate provides the foundation error types used throughout the Tollgate workspace.
//!
//! # Error Hierarchy
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind (or a message) with source location tracking
//! - All constructors use `#[track_caller]` for automatic location capture
//!
//! Timeouts are not errors in Tollgate. A limiter that cannot admit a call in
//! time returns `false`; only configuration, platform and storage failures are
//! represented here.
//!
//! # Examples
//!
//! ```
//! use tollgate_error::{ConfigError, TollgateResult};
//!
//! fn requests_per_minute(value: u32) -> TollgateResult<u32> {
//!     if value == 0 {
//!         Err(ConfigError::new("requests_per_minute must be positive"))?
//!     }
//!     Ok(value)
//! }
//!
//! assert!(requests_per_minute(0).is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
mod error;
mod platform;
mod retryable;
mod storage;

pub use builder::{BuilderError, BuilderErrorKind};
pub use config::ConfigError;
pub use error::{TollgateError, TollgateErrorKind, TollgateResult};
pub use platform::PlatformError;
pub use retryable::RetryableError;
pub use storage::{StorageError, StorageErrorKind};
