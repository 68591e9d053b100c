//! Pidfile-backed identity lock
//!
//! The lock is a plain file created with `O_CREAT | O_EXCL` that holds the
//! owner's pid as text. Its existence on disk is the liveness signal the
//! rest of the system relies on: the spawning parent polls for it to confirm
//! the daemon started, and [`crate::probe::process_runs`] reads the pid back
//! out of it to answer "is this job still alive".
//!
//! Because absence must reliably mean "no active holder", release happens in
//! [`LockGuard`]'s `Drop` impl, which runs on normal return and on panic
//! unwind alike.

use crate::{Result, SpawnError};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long [`PidLock::acquire`] keeps retrying before giving up.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between exclusive-create attempts while the path is contended.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An exclusive, path-addressed lock with a bounded acquisition timeout.
///
/// At most one holder system-wide per path. Non-reentrant: a second
/// `acquire` on the same path times out until the first guard is dropped.
#[derive(Debug, Clone)]
pub struct PidLock {
    path: PathBuf,
    timeout: Duration,
}

impl PidLock {
    /// Create a lock handle for `path` with the default 5 second timeout.
    ///
    /// The path must be absolute so that the parent and the detached child,
    /// which changes its working directory, agree on the same file.
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_timeout(path, DEFAULT_ACQUIRE_TIMEOUT)
    }

    /// Create a lock handle with an explicit acquisition timeout.
    pub fn with_timeout(path: &Path, timeout: Duration) -> Result<Self> {
        if !path.is_absolute() {
            return Err(SpawnError::LockPathNotAbsolute(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            timeout,
        })
    }

    /// The filesystem path backing this lock.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempt to take exclusive ownership of the lock path.
    ///
    /// Retries exclusive creation until the timeout elapses, then fails with
    /// [`SpawnError::LockTimeout`]. On success the file contains the current
    /// process id.
    pub fn acquire(&self) -> Result<LockGuard> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    if let Err(err) = persist_pid(&mut file) {
                        // The file was created but the pid never made it
                        // in; remove it so the path does not read as held
                        let _ = fs::remove_file(&self.path);
                        return Err(err.into());
                    }
                    debug!("acquired lock file {}", self.path.display());
                    return Ok(LockGuard {
                        path: self.path.clone(),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        warn!(
                            "gave up acquiring lock file {} after {:?}",
                            self.path.display(),
                            self.timeout
                        );
                        return Err(SpawnError::LockTimeout(self.path.clone()));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Ownership of an acquired lock file. Removes the file when dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// The path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the stored pid with the current process id.
    ///
    /// The lock is acquired between the two detach stages, so the pid written
    /// at acquisition belongs to the intermediate process. The daemon calls
    /// this after the second fork so liveness probes target the right pid.
    ///
    /// The swap goes through a sibling temp file and a rename: a concurrent
    /// liveness probe must never observe a truncated pid.
    pub fn rewrite_pid(&self) -> io::Result<()> {
        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, format!("{}\n", std::process::id()))?;
        fs::rename(&tmp, &self.path)
    }

    /// Release the lock explicitly, removing the file.
    pub fn release(self) {
        // Drop does the removal
    }
}

/// Record the caller's pid in a freshly created lock file.
fn persist_pid(file: &mut fs::File) -> io::Result<()> {
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            // Already gone is fine; anything else is worth a log line
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "failed to remove lock file {}: {}",
                    self.path.display(),
                    err
                );
            }
        } else {
            debug!("released lock file {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_own_pid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("job.lock");

        let lock = PidLock::new(&path).expect("lock handle");
        let guard = lock.acquire().expect("acquire");

        let content = fs::read_to_string(&path).expect("read lock file");
        assert_eq!(
            content.trim().parse::<u32>().expect("pid"),
            std::process::id()
        );
        drop(guard);
    }

    #[test]
    fn test_release_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("job.lock");

        let lock = PidLock::new(&path).expect("lock handle");
        let guard = lock.acquire().expect("acquire");
        assert!(path.exists());

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("job.lock");

        let lock = PidLock::with_timeout(&path, Duration::from_millis(300)).expect("lock handle");
        let _guard = lock.acquire().expect("first acquire");

        let started = Instant::now();
        let second = lock.acquire();
        match second {
            Err(SpawnError::LockTimeout(p)) => assert_eq!(p, path),
            other => panic!("expected LockTimeout, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_reacquire_after_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("job.lock");

        let lock = PidLock::with_timeout(&path, Duration::from_millis(200)).expect("lock handle");
        drop(lock.acquire().expect("first acquire"));
        let second = lock.acquire().expect("second acquire after release");
        drop(second);
    }

    #[test]
    fn test_relative_path_rejected() {
        let result = PidLock::new(Path::new("job.lock"));
        match result {
            Err(SpawnError::LockPathNotAbsolute(_)) => {}
            other => panic!("expected LockPathNotAbsolute, got {other:?}"),
        }
    }

    #[test]
    fn test_rewrite_pid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("job.lock");

        let lock = PidLock::new(&path).expect("lock handle");
        let guard = lock.acquire().expect("acquire");
        guard.rewrite_pid().expect("rewrite");

        let content = fs::read_to_string(&path).expect("read lock file");
        assert_eq!(
            content.trim().parse::<u32>().expect("pid"),
            std::process::id()
        );
        // the temp file used for the swap must not linger
        let entries: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("job.lock")]);
    }

    #[test]
    fn test_rewrite_pid_never_exposes_partial_content() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("job.lock");

        let lock = PidLock::new(&path).expect("lock handle");
        let guard = lock.acquire().expect("acquire");

        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);
        let reader_path = path.clone();
        let reader = std::thread::spawn(move || {
            // a probe reading mid-rewrite must always find a full pid
            while !reader_stop.load(Ordering::Relaxed) {
                match fs::read_to_string(&reader_path) {
                    Ok(content) => {
                        if content.trim().parse::<i32>().is_err() {
                            return false;
                        }
                    }
                    Err(_) => return false,
                }
            }
            true
        });

        for _ in 0..500 {
            guard.rewrite_pid().expect("rewrite");
        }
        stop.store(true, Ordering::Relaxed);
        assert!(
            reader.join().expect("reader thread"),
            "a concurrent probe observed a partial pid file"
        );
    }
}
