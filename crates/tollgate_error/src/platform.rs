//! Platform capability errors.

/// The host cannot provide the primitives cross-process coordination needs.
///
/// Typically raised when the state directory lives on a filesystem that does
/// not support advisory locks. Running without the lock would mean no
/// coordination at all, so this error is never downgraded to a warning.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Platform Error: {} at line {} in {}", message, line, file)]
pub struct PlatformError {
    /// Description of the missing capability
    pub message: String,
    /// Line number where the error occurred
    pub line: u32,
    /// File where the error occurred
    pub file: &'static str,
}

impl PlatformError {
    /// Create a new PlatformError at the current location.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_error::PlatformError;
    ///
    /// let err = PlatformError::new("advisory locks unsupported on /mnt/share");
    /// assert!(format!("{}", err).contains("Platform Error"));
    /// ```
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: location.line(),
            file: location.file(),
        }
    }
}
