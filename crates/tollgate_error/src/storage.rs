//! Shared state storage error types.

/// Kinds of storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum StorageErrorKind {
    /// Failed to create the state directory
    #[display("Failed to create state directory: {}", _0)]
    DirectoryCreation(String),
    /// Failed to write the state file
    #[display("Failed to write state file: {}", _0)]
    FileWrite(String),
    /// Failed to open or create the lock file
    #[display("Failed to open lock file: {}", _0)]
    LockFile(String),
    /// Lock stayed held past the per-attempt deadline
    #[display("Lock busy: {}", _0)]
    LockBusy(String),
    /// Failed to serialize the state
    #[display("Failed to serialize state: {}", _0)]
    Serialization(String),
}

/// Storage error with location tracking.
///
/// # Examples
///
/// ```
/// use tollgate_error::{StorageError, StorageErrorKind};
///
/// let err = StorageError::new(StorageErrorKind::LockBusy("/tmp/quota.lock".to_string()));
/// assert!(format!("{}", err).contains("Lock busy"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Storage Error: {} at line {} in {}", kind, line, file)]
pub struct StorageError {
    /// The kind of error that occurred
    pub kind: StorageErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl StorageError {
    /// Create a new storage error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: StorageErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &StorageErrorKind {
        &self.kind
    }
}
