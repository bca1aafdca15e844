//! Persisted sliding-window state shared by cooperating processes.
//!
//! The state file is only ever read or written while holding the quota lock.
//! Writes go to a temporary sibling first and are renamed over the original,
//! so a crash mid-write leaves either the old file or the new one.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tollgate_error::{StorageError, StorageErrorKind, TollgateResult};

/// Sliding-window request log, as stored on disk.
///
/// ```json
/// { "requestLog": [1718000000.25], "limit": 240, "windowSeconds": 60,
///   "lastWriterInstant": 1718000000.25, "lastWriterIdentity": "pid-4242" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedQuotaState {
    /// Unix timestamps (seconds) of admitted requests, oldest first
    #[serde(default)]
    pub request_log: Vec<f64>,
    /// Maximum entries permitted within the window
    pub limit: u32,
    /// Window length in seconds
    pub window_seconds: u64,
    /// Writer's clock at the last write
    #[serde(default)]
    pub last_writer_instant: f64,
    /// Process that performed the last write
    #[serde(default)]
    pub last_writer_identity: String,
}

/// What was found at the state path.
#[derive(Debug)]
pub(crate) enum LoadedState {
    Missing,
    Corrupt(String),
    Loaded(SharedQuotaState),
}

impl SharedQuotaState {
    /// Empty window.
    pub fn empty(limit: u32, window_seconds: u64) -> Self {
        Self {
            request_log: Vec::new(),
            limit,
            window_seconds,
            last_writer_instant: 0.0,
            last_writer_identity: String::new(),
        }
    }

    /// Drop entries that fell out of the window ending at `now`.
    pub fn prune(&mut self, now: f64) {
        let cutoff = now - self.window_seconds as f64;
        self.request_log.retain(|&stamp| stamp > cutoff);
    }

    /// Entries currently in the log.
    pub fn len(&self) -> usize {
        self.request_log.len()
    }

    /// True when the log is empty.
    pub fn is_empty(&self) -> bool {
        self.request_log.is_empty()
    }

    /// Oldest logged request.
    pub fn oldest(&self) -> Option<f64> {
        self.request_log.iter().copied().reduce(f64::min)
    }

    /// Newest logged request.
    pub fn newest(&self) -> Option<f64> {
        self.request_log.iter().copied().reduce(f64::max)
    }

    /// Append a request stamped with the writer's own clock.
    ///
    /// Entries from a skewed writer are left as they are; `health_check`
    /// reports them instead of letting them shift later stamps.
    pub(crate) fn record(&mut self, now: f64, identity: &str) {
        self.request_log.push(now);
        self.last_writer_instant = now;
        self.last_writer_identity = identity.to_string();
    }

    /// Read the state file. Never fails: problems are reported as
    /// [`LoadedState::Missing`] or [`LoadedState::Corrupt`].
    pub(crate) fn read(path: &Path) -> LoadedState {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return LoadedState::Missing,
            Err(e) => return LoadedState::Corrupt(format!("unreadable: {}", e)),
        };

        match serde_json::from_str::<SharedQuotaState>(&contents) {
            Ok(state) if state.request_log.iter().all(|stamp| stamp.is_finite()) => {
                LoadedState::Loaded(state)
            }
            Ok(_) => LoadedState::Corrupt("non-finite timestamp in request log".to_string()),
            Err(e) => LoadedState::Corrupt(format!("unparseable: {}", e)),
        }
    }

    /// Write via a temporary file and rename over `path`.
    pub(crate) fn write_atomic(&self, path: &Path) -> TollgateResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| {
            StorageError::new(StorageErrorKind::Serialization(e.to_string()))
        })?;

        let tmp = temp_path(path);
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "{}: {}",
                path.display(),
                e
            )))
        })?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Wall-clock time as fractional Unix seconds.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_drops_only_expired_entries() {
        let mut state = SharedQuotaState::empty(10, 60);
        state.request_log = vec![100.0, 139.9, 141.0, 199.0];
        state.prune(200.0);
        assert_eq!(state.request_log, vec![141.0, 199.0]);
    }

    #[test]
    fn test_record_uses_writer_clock() {
        let mut state = SharedQuotaState::empty(10, 60);
        state.record(3650.0, "ahead");
        state.record(49.0, "b");
        assert_eq!(state.request_log, vec![3650.0, 49.0]);
        assert_eq!(state.oldest(), Some(49.0));
        assert_eq!(state.newest(), Some(3650.0));
        assert_eq!(state.last_writer_identity, "b");
        assert_eq!(state.last_writer_instant, 49.0);
    }

    #[test]
    fn test_round_trip_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = SharedQuotaState::empty(5, 60);
        state.record(1.5, "pid-1");
        state.write_atomic(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("requestLog"));
        assert!(raw.contains("windowSeconds"));

        match SharedQuotaState::read(&path) {
            LoadedState::Loaded(loaded) => assert_eq!(loaded, state),
            other => panic!("expected loaded state, got {:?}", other),
        }
        // No temporary file left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert!(matches!(SharedQuotaState::read(&path), LoadedState::Missing));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(SharedQuotaState::read(&path), LoadedState::Corrupt(_)));
    }
}
