//! Process liveness probing
//!
//! Answers "does this pid exist" by sending the null signal, and composes
//! that with the pidfile convention from [`crate::lockfile`] to answer
//! "is the job behind this lock file still running".

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Check whether `pid` exists in the current process table.
///
/// Sends signal 0, which performs the permission and existence checks
/// without delivering anything. `EPERM` means the process exists but is
/// owned by someone else, so it counts as alive. Negative pids are defined
/// to not exist and no signal is attempted.
pub fn pid_exists(pid: i32) -> bool {
    if pid < 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Check whether the job behind `lock_path` is still running.
///
/// Reads the pid stored in the lock file and probes it. A missing file or
/// malformed (non-integer) content means "not running", not an error: a
/// stale or corrupt pidfile and an absent one answer the question the same
/// way.
pub fn process_runs(lock_path: &Path) -> bool {
    debug!("process runs? {}", lock_path.display());
    if !lock_path.exists() {
        return false;
    }
    match fs::read_to_string(lock_path) {
        Ok(content) => match content.trim().parse::<i32>() {
            Ok(pid) => pid_exists(pid),
            Err(_) => false,
        },
        Err(_) => false,
    }
}
