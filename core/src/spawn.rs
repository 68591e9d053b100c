//! Detached job spawning with pidfile confirmation
//!
//! The launching process forks; the child detaches in two stages (setsid,
//! then a second fork) and runs the command to completion while the parent
//! confirms the start by polling for the identity lock file. The lock is
//! acquired between the two detach stages so an acquisition timeout can be
//! signalled back to the parent through the intermediate process's exit
//! status instead of vanishing with the daemon.
//!
//! Known race, preserved on purpose: the parent cannot distinguish "child
//! is slow to acquire the lock" from "child already finished and released
//! it", so a job shorter than the confirmation window can be reported as
//! [`SpawnError::SpawnTimeout`] even though it ran.

use crate::lockfile::PidLock;
use crate::report::JobReport;
use crate::{Result, SpawnError};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, dup2, fork, setsid, ForkResult, Pid};
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::process::{self, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Number of lock-file polls the parent makes before giving up.
pub const SPAWN_RETRIES: u32 = 3;

/// Spacing between the parent's confirmation polls.
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Fixed delay before the report is finalised, reserved for trailing I/O.
const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Exit code the intermediate process uses to signal a lock-acquisition
/// timeout back to the waiting parent. EX_TEMPFAIL from sysexits.
const LOCK_TIMEOUT_EXIT_CODE: i32 = 75;

/// Spawn `command` as a detached background process and confirm it started.
///
/// The command is split on single spaces into an argument vector; no shell
/// quoting is performed, so arguments containing spaces cannot be expressed.
/// The detached process runs the command to completion with both output
/// streams captured, then appends a [`JobReport`] to `report_path` and
/// exits 0 whether or not the job succeeded.
///
/// `lock_path` must be absolute and must not already exist. On success the
/// returned pid is the forked child's; the lock file exists and holds the
/// daemon's pid until the daemon exits.
///
/// # Errors
///
/// [`SpawnError::AlreadyRunning`] if the lock path pre-exists,
/// [`SpawnError::ForkFailure`] if the OS refuses the fork,
/// [`SpawnError::LockTimeout`] if the child could not acquire the lock,
/// [`SpawnError::SpawnTimeout`] if confirmation retries are exhausted.
pub fn spawn(command: &str, report_path: &Path, lock_path: &Path) -> Result<Pid> {
    let lock = PidLock::new(lock_path)?;
    // Cooperative guard against double submission, not atomic with the
    // child's exclusive create
    if lock_path.exists() {
        return Err(SpawnError::AlreadyRunning(lock_path.to_path_buf()));
    }
    debug!("spawning detached job: {command}");
    match unsafe { fork() }.map_err(SpawnError::ForkFailure)? {
        ForkResult::Parent { child } => confirm_spawn(child, lock_path),
        ForkResult::Child => daemonize_and_run(command, report_path, lock),
    }
}

/// Parent flow: wait for the intermediate child, then poll for the lock.
fn confirm_spawn(child: Pid, lock_path: &Path) -> Result<Pid> {
    debug!("waiting for intermediate child {child} to detach");
    let status = waitpid(child, None).map_err(SpawnError::ForkFailure)?;
    if let WaitStatus::Exited(_, code) = status {
        if code == LOCK_TIMEOUT_EXIT_CODE {
            return Err(SpawnError::LockTimeout(lock_path.to_path_buf()));
        }
    }
    if lock_path.exists() {
        return Ok(child);
    }
    for attempt in 1..=SPAWN_RETRIES {
        debug!("lock file not present yet, poll {attempt}/{SPAWN_RETRIES}");
        if lock_path.exists() {
            return Ok(child);
        }
        thread::sleep(RETRY_INTERVAL);
    }
    Err(SpawnError::SpawnTimeout(SPAWN_RETRIES))
}

/// Child flow: detach, hold the identity lock, run the job, write the
/// report. Never returns into the caller's control flow.
fn daemonize_and_run(command: &str, report_path: &Path, lock: PidLock) -> ! {
    // Stage one: new session, away from the controlling terminal
    if setsid().is_err() {
        process::exit(1);
    }
    let guard = match lock.acquire() {
        Ok(guard) => guard,
        Err(SpawnError::LockTimeout(_)) => process::exit(LOCK_TIMEOUT_EXIT_CODE),
        Err(_) => process::exit(1),
    };
    // Stage two: re-fork so the daemon is not a session leader and the
    // parent's waitpid returns before the job does
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {
            // process::exit skips Drop, the lock file stays for the daemon
            process::exit(0);
        }
        Ok(ForkResult::Child) => {}
        Err(_) => {
            drop(guard);
            process::exit(1);
        }
    }
    let _ = chdir("/");
    if let Err(err) = redirect_stdio() {
        debug!("could not redirect stdio to /dev/null: {err}");
    }
    // The pid written at acquisition belongs to the intermediate process
    if let Err(err) = guard.rewrite_pid() {
        debug!("could not rewrite pid in lock file: {err}");
    }
    run_job(command, report_path);
    guard.release();
    process::exit(0);
}

/// Run the command and append the report. Failures to launch are recovered
/// into the report, never escalated: by now the caller already has its
/// answer and the daemon's exit code is not the job's exit status.
fn run_job(command: &str, report_path: &Path) {
    let started = Instant::now();
    let mut success = true;
    let (stdout, stderr) = match run_command(command) {
        Ok(output) => output,
        Err(err) => {
            error!("job could not be run: {err}");
            success = false;
            (String::new(), err.to_string())
        }
    };
    thread::sleep(SETTLE_DELAY);
    let report = JobReport {
        command: command.to_string(),
        success,
        stdout,
        stderr,
        elapsed: started.elapsed(),
    };
    if let Err(err) = report.append_to(report_path) {
        error!("failed to write report {}: {err}", report_path.display());
    }
}

/// Execute the command synchronously, capturing both streams in full.
/// No timeout: the command runs to natural completion.
fn run_command(command: &str) -> io::Result<(String, String)> {
    let mut parts = command.split(' ');
    let program = parts
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
    let output = Command::new(program)
        .args(parts)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;
    Ok((
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Point the inherited stdio descriptors at /dev/null.
fn redirect_stdio() -> io::Result<()> {
    let devnull = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let fd = devnull.as_raw_fd();
    for target in 0..=2 {
        dup2(fd, target).map_err(io::Error::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_captures_stdout() {
        let (stdout, stderr) = run_command("echo hello").expect("echo should run");
        assert_eq!(stdout, "hello\n");
        assert!(stderr.is_empty());
    }

    #[test]
    fn test_run_command_captures_stderr() {
        // ls on a path that cannot exist writes to stderr
        let (_, stderr) = run_command("ls /definitely/not/a/path").expect("ls should launch");
        assert!(!stderr.is_empty());
    }

    #[test]
    fn test_run_command_nonexistent_program() {
        assert!(run_command("no_such_binary_420000").is_err());
    }

    #[test]
    fn test_run_command_empty() {
        let err = run_command("").expect_err("empty command must be rejected");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_run_command_single_space_split() {
        // split is on single spaces only; the double space becomes an empty
        // argument, which echo renders as the gap between two separators
        let (stdout, _) = run_command("echo a  b").expect("echo should run");
        assert_eq!(stdout, "a  b\n");
    }
}
