//! Exclusive advisory lock on the quota lock file.
//!
//! On Unix and Windows the lock is an OS advisory lock (`flock` /
//! `LockFileEx` via `fs2`), released by the kernel if the holder dies. Other
//! platforms fall back to an exclusively-created sentinel file, which is
//! considered abandoned once it is older than [`SENTINEL_STALE_AFTER`].
//!
//! Every acquisition is bounded by a deadline. Running out of time is the
//! ordinary "busy" outcome, not an error.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tollgate_error::{PlatformError, StorageError, StorageErrorKind, TollgateResult};
use tracing::{debug, warn};

/// Pause between lock attempts.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Age after which a fallback sentinel is treated as left behind by a crash.
#[cfg_attr(any(unix, windows), allow(dead_code))]
pub(crate) const SENTINEL_STALE_AFTER: Duration = Duration::from_secs(30);

/// Result of a bounded lock attempt.
#[derive(Debug)]
pub(crate) enum LockAttempt {
    Acquired(QuotaLock),
    Busy,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub(crate) struct QuotaLock {
    handle: imp::Handle,
    path: PathBuf,
}

impl Drop for QuotaLock {
    fn drop(&mut self) {
        if let Err(e) = imp::unlock(&self.handle) {
            warn!(path = %self.path.display(), error = %e, "Failed to release quota lock");
        }
    }
}

/// Create the lock file if needed. Its contents are never used.
pub(crate) fn ensure_lock_file(path: &Path) -> TollgateResult<()> {
    open_lock_file(path).map(|_| ())
}

fn open_lock_file(path: &Path) -> TollgateResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| {
            StorageError::new(StorageErrorKind::LockFile(format!(
                "{}: {}",
                path.display(),
                e
            )))
            .into()
        })
}

/// Try to take the lock until `deadline` elapses. A zero deadline makes
/// exactly one attempt.
///
/// # Errors
///
/// Returns a storage error if the lock file cannot be opened and a platform
/// error if the filesystem rejects advisory locking.
pub(crate) fn acquire(path: &Path, deadline: Duration) -> TollgateResult<LockAttempt> {
    let handle = imp::open(path)?;
    let started = Instant::now();

    loop {
        match imp::try_lock(&handle) {
            Ok(true) => {
                return Ok(LockAttempt::Acquired(QuotaLock {
                    handle,
                    path: path.to_path_buf(),
                }));
            }
            Ok(false) => {}
            Err(e) => {
                Err(PlatformError::new(format!(
                    "advisory lock on {} failed: {}",
                    path.display(),
                    e
                )))?
            }
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            debug!(path = %path.display(), "Quota lock busy past deadline");
            return Ok(LockAttempt::Busy);
        }
        std::thread::sleep(LOCK_RETRY_INTERVAL.min(remaining));
    }
}

#[cfg(any(unix, windows))]
mod imp {
    use super::*;
    use fs2::FileExt;

    pub(crate) type Handle = File;

    pub(crate) fn open(path: &Path) -> TollgateResult<Handle> {
        open_lock_file(path)
    }

    pub(crate) fn try_lock(file: &File) -> io::Result<bool> {
        match FileExt::try_lock_exclusive(file) {
            Ok(()) => Ok(true),
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn unlock(file: &File) -> io::Result<()> {
        FileExt::unlock(file)
    }

    fn is_contended(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::WouldBlock
            || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    use super::*;

    /// Path of the sentinel created while the lock is held.
    #[derive(Debug)]
    pub(crate) struct Handle(PathBuf);

    pub(crate) fn open(path: &Path) -> TollgateResult<Handle> {
        open_lock_file(path)?;
        let mut sentinel = path.as_os_str().to_os_string();
        sentinel.push(".held");
        Ok(Handle(PathBuf::from(sentinel)))
    }

    pub(crate) fn try_lock(handle: &Handle) -> io::Result<bool> {
        match OpenOptions::new().write(true).create_new(true).open(&handle.0) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let age = std::fs::metadata(&handle.0)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| modified.elapsed().ok());
                if age.is_some_and(|age| age > SENTINEL_STALE_AFTER) {
                    warn!(sentinel = %handle.0.display(), "Removing stale lock sentinel");
                    let _ = std::fs::remove_file(&handle.0);
                }
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn unlock(handle: &Handle) -> io::Result<()> {
        std::fs::remove_file(&handle.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_holder_is_busy_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota.lock");

        let first = match acquire(&path, Duration::ZERO).unwrap() {
            LockAttempt::Acquired(lock) => lock,
            LockAttempt::Busy => panic!("fresh lock should be free"),
        };

        let started = Instant::now();
        assert!(matches!(
            acquire(&path, Duration::from_millis(50)).unwrap(),
            LockAttempt::Busy
        ));
        assert!(started.elapsed() >= Duration::from_millis(50));

        drop(first);
        assert!(matches!(
            acquire(&path, Duration::ZERO).unwrap(),
            LockAttempt::Acquired(_)
        ));
    }

    #[test]
    fn test_unopenable_lock_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("quota.lock");
        assert!(acquire(&path, Duration::ZERO).is_err());
    }
}
