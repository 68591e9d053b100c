//! Process table enumeration via `/proc`
//!
//! Reads kernel-exposed process metadata: pid, raw command line, start
//! timestamp and the `key: value` attributes from `/proc/<pid>/status`.
//! See `man 5 proc`.
//!
//! Enumeration is tolerant by design: processes routinely exit between
//! discovery and read, and unprivileged readers hit permission errors.
//! Both are expected races, logged at debug and skipped, never surfaced
//! as errors.

use nix::unistd::{sysconf, SysconfVar};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Fallback scheduler tick rate when sysconf cannot report one.
const DEFAULT_CLK_TCK: u64 = 100;

/// A point-in-time snapshot of one kernel-visible process.
///
/// Valid only for the instant it was read; the process may be gone by the
/// time the record is inspected.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    /// Process id
    pub id: i32,
    /// Command line with NUL separators rendered as spaces
    pub cmdline: String,
    /// Start time as seconds since the Unix epoch
    pub running_since: u64,
    /// Attributes from `/proc/<pid>/status`, keyed by field name
    pub status: HashMap<String, String>,
}

/// Reader over the kernel process table.
///
/// Holds the cached boot time and tick rate needed to turn a process's
/// scheduler-tick offset into a wall-clock start timestamp. Boot time is
/// read lazily on first use and cached for the lifetime of the reader
/// instance; a fresh reader re-reads it.
#[derive(Debug)]
pub struct ProcessTable {
    boot_time: Option<u64>,
    ticks_per_second: u64,
}

impl ProcessTable {
    pub fn new() -> Self {
        let ticks_per_second = sysconf(SysconfVar::CLK_TCK)
            .ok()
            .flatten()
            .map(|v| v as u64)
            .unwrap_or(DEFAULT_CLK_TCK);
        Self {
            boot_time: None,
            ticks_per_second,
        }
    }

    /// Enumerate currently-visible processes.
    ///
    /// One finite pass: pids are listed up front, per-process metadata is
    /// read lazily as the iterator advances. Records that become unreadable
    /// mid-scan are omitted. Re-invoking re-scans from scratch.
    pub fn processes(&mut self) -> impl Iterator<Item = ProcessRecord> + '_ {
        let pids = list_pids();
        pids.into_iter().filter_map(move |pid| {
            match self.read_record(pid) {
                Ok(record) => Some(record),
                Err(err) => {
                    // Process exited mid-scan or we lack permission
                    debug!("cannot read process {pid}, skipping: {err}");
                    None
                }
            }
        })
    }

    /// Wall-clock start time of `pid` in seconds since the Unix epoch.
    ///
    /// Computed as `boot_time + starttime_ticks / CLK_TCK`, where
    /// `starttime_ticks` is field 22 of `/proc/<pid>/stat`.
    pub fn started_at(&mut self, pid: i32) -> io::Result<u64> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat"))?;
        // comm (field 2) is parenthesised and may contain spaces, so the
        // remaining fields are located after the last ')'
        let rest = stat
            .rfind(')')
            .map(|idx| &stat[idx + 1..])
            .ok_or_else(|| invalid_stat(pid))?;
        // starttime is field 22 overall, the 20th after comm
        let ticks: u64 = rest
            .split_whitespace()
            .nth(19)
            .and_then(|field| field.parse().ok())
            .ok_or_else(|| invalid_stat(pid))?;
        Ok(self.boot_time()? + ticks / self.ticks_per_second)
    }

    fn read_record(&mut self, pid: i32) -> io::Result<ProcessRecord> {
        let cmdline_raw = fs::read(format!("/proc/{pid}/cmdline"))?;
        let cmdline = String::from_utf8_lossy(&cmdline_raw)
            .replace('\0', " ")
            .trim_end()
            .to_string();
        let running_since = self.started_at(pid)?;
        let status = parse_status(&fs::read_to_string(format!("/proc/{pid}/status"))?);
        Ok(ProcessRecord {
            id: pid,
            cmdline,
            running_since,
            status,
        })
    }

    /// Kernel boot time in seconds since the Unix epoch, from the `btime`
    /// line of `/proc/stat`. Read once, then served from cache.
    fn boot_time(&mut self) -> io::Result<u64> {
        if let Some(cached) = self.boot_time {
            return Ok(cached);
        }
        let stat = fs::read_to_string("/proc/stat")?;
        let btime = stat
            .lines()
            .find_map(|line| {
                line.strip_prefix("btime")
                    .and_then(|rest| rest.trim().parse::<u64>().ok())
            })
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "no btime line in /proc/stat")
            })?;
        self.boot_time = Some(btime);
        Ok(btime)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Numeric entries under `/proc`, i.e. the currently-visible pids.
fn list_pids() -> Vec<i32> {
    let mut pids = Vec::new();
    let entries = match fs::read_dir(Path::new("/proc")) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("cannot list /proc: {err}");
            return pids;
        }
    };
    for entry in entries.flatten() {
        if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            pids.push(pid);
        }
    }
    pids
}

/// Parse `/proc/<pid>/status` content. Lines without a colon are skipped.
fn parse_status(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            line.split_once(':')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn invalid_stat(pid: i32) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed /proc/{pid}/stat"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_key_values() {
        let content = "Name:\tcat\nPid:\t42\nnot a status line\nState:\tR (running)\n";
        let status = parse_status(content);
        assert_eq!(status.get("Name").map(String::as_str), Some("cat"));
        assert_eq!(status.get("Pid").map(String::as_str), Some("42"));
        assert_eq!(status.get("State").map(String::as_str), Some("R (running)"));
        assert_eq!(status.len(), 3);
    }

    #[test]
    fn test_enumeration_includes_self() {
        let own_pid = std::process::id() as i32;
        let mut table = ProcessTable::new();
        let record = table
            .processes()
            .find(|record| record.id == own_pid)
            .expect("own process should be visible");
        assert_eq!(record.status.get("Pid").map(String::as_str), Some(
            format!("{own_pid}").as_str()
        ));
        assert!(!record.cmdline.is_empty());
    }

    #[test]
    fn test_started_at_is_plausible() {
        let mut table = ProcessTable::new();
        let started = table
            .started_at(std::process::id() as i32)
            .expect("own stat should be readable");
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock after epoch")
            .as_secs();
        assert!(started > 0);
        assert!(started <= now + 1);
    }

    #[test]
    fn test_boot_time_cached() {
        let mut table = ProcessTable::new();
        let first = table.boot_time().expect("boot time");
        let second = table.boot_time().expect("boot time again");
        assert_eq!(first, second);
    }

    #[test]
    fn test_started_at_missing_pid() {
        let mut table = ProcessTable::new();
        assert!(table.started_at(i32::MAX).is_err());
    }
}
