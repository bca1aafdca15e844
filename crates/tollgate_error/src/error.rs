//! Top-level error wrapper types.

use crate::{BuilderError, ConfigError, PlatformError, StorageError};

/// Every error condition a Tollgate operation can surface.
///
/// # Examples
///
/// ```
/// use tollgate_error::{ConfigError, TollgateError};
///
/// let err: TollgateError = ConfigError::new("limit must be positive").into();
/// assert!(format!("{}", err).contains("Configuration Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum TollgateErrorKind {
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// Shared state storage error
    #[from(StorageError)]
    Storage(StorageError),
    /// Locking primitive unavailable
    #[from(PlatformError)]
    Platform(PlatformError),
    /// Builder error
    #[from(BuilderError)]
    Builder(BuilderError),
}

/// Tollgate error with kind discrimination.
///
/// # Examples
///
/// ```
/// use tollgate_error::{PlatformError, TollgateErrorKind, TollgateResult};
///
/// fn lock() -> TollgateResult<()> {
///     Err(PlatformError::new("flock unsupported"))?
/// }
///
/// let err = lock().unwrap_err();
/// assert!(matches!(err.kind(), TollgateErrorKind::Platform(_)));
/// ```
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Tollgate Error: {}", _0)]
pub struct TollgateError(Box<TollgateErrorKind>);

impl TollgateError {
    /// Create a new error from a kind.
    pub fn new(kind: TollgateErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &TollgateErrorKind {
        &self.0
    }
}

// Generic From implementation for any type that converts to TollgateErrorKind
impl<T> From<T> for TollgateError
where
    T: Into<TollgateErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for Tollgate operations.
pub type TollgateResult<T> = std::result::Result<T, TollgateError>;
