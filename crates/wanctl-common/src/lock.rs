//! Single-instance lock file.
//!
//! The lock file holds the owner's PID with a trailing newline; its mtime
//! is the liveness probe. A lock is live only while the PID is alive and
//! the mtime is younger than the configured timeout — anything else is
//! stale and gets reclaimed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Why the lock could not be acquired.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another live instance holds the lock. Callers exit with code 2.
    #[error("lock {path} held by live pid {pid} ({age:.1}s old)")]
    Held { path: PathBuf, pid: i32, age: f64 },
    #[error("lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Held lock. Dropping it removes the lock file.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquire the lock or fail if a live peer holds it.
    ///
    /// A stale lock (dead PID, or mtime older than `timeout`) is
    /// reclaimed with a warning.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<LockFile, LockError> {
        if let Ok(meta) = fs::metadata(path) {
            let age = meta
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            let pid = read_pid(path);
            let pid_alive = pid.map(pid_is_alive).unwrap_or(false);

            if pid_alive && age < timeout {
                return Err(LockError::Held {
                    path: path.to_path_buf(),
                    pid: pid.unwrap_or(0),
                    age: age.as_secs_f64(),
                });
            }

            tracing::warn!(
                path = %path.display(),
                age_s = age.as_secs_f64(),
                pid = ?pid,
                pid_alive,
                "reclaiming stale lock file"
            );
            fs::remove_file(path).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, format!("{}\n", std::process::id())).map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "lock acquired");

        Ok(LockFile {
            path: path.to_path_buf(),
        })
    }

    /// Path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
            }
        } else {
            tracing::debug!(path = %self.path.display(), "lock released");
        }
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Signal 0 probes existence without touching the process.
fn pid_is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // EPERM still means the process exists.
    unsafe { libc::kill(pid, 0) == 0 || *libc::__errno_location() == libc::EPERM }
}
