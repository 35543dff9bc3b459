//! Single entry-point admission control (spec.md §4.5).
//!
//! Every request is serialized behind a lock file before it ever reaches
//! `Runner`, so that even if this binary is ever run as more than one OS
//! process against the same `install_dir`, only one upload at a time is
//! admitted to the sandbox.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use file_lock::{FileLock, FileOptions};

use crate::notifier::Notifier;
use crate::runner::Runner;
use crate::schema::{ApiResponse, RequestStatus};

pub struct RequestGate {
    lock_path: PathBuf,
}

impl RequestGate {
    pub fn new(lock_path: &Path) -> Self {
        RequestGate {
            lock_path: lock_path.to_path_buf(),
        }
    }

    /// Acquire the lock for the duration of one request. Blocking I/O —
    /// callers on a tokio runtime must run this via `spawn_blocking`.
    pub fn acquire(&self) -> Result<FileLock> {
        let options = FileOptions::new().write(true).create(true);
        FileLock::lock(&self.lock_path, true, options)
            .with_context(|| format!("acquire request lock at {}", self.lock_path.display()))
    }
}

/// The admission decision of spec.md §4.5, independent of any HTTP
/// framework: no `file` field is a bad request, an already-busy runner is
/// reported as busy, otherwise the run starts and `ok` is reported.
pub fn admit(runner: &Runner, archive_bytes: Option<Vec<u8>>, notifier: Option<Notifier>) -> ApiResponse {
    let Some(bytes) = archive_bytes else {
        return ApiResponse::with_message(RequestStatus::BadRequest, "missing file field");
    };

    match runner.start(&bytes, notifier) {
        Ok(true) => ApiResponse::new(RequestStatus::Ok),
        Ok(false) => ApiResponse::new(RequestStatus::Busy),
        Err(e) => ApiResponse::with_message(RequestStatus::Error, format!("{e:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Paths;
    use std::time::Duration;

    #[test]
    fn missing_file_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::new(tmp.path(), tmp.path());
        let runner = Runner::new(paths, Duration::from_secs(5), 4096, "64M".to_string()).unwrap();

        let response = admit(&runner, None, None);
        assert_eq!(response.status, "bad_request");
    }
}
