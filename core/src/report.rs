//! Job report formatting and writing
//!
//! The report is the single durable artifact of a job: elapsed wall-clock
//! time, the literal command, a success or failure line, then the captured
//! stdout and stderr blocks. It is appended exactly once by the detached
//! process after the command terminates; the daemon's own exit code never
//! reflects the job outcome, only the report body does.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Outcome of one job, ready to be appended to a report file.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// The literal command string as submitted
    pub command: String,
    /// Whether the command could be launched and run to completion.
    /// The command's own exit status does not affect this flag.
    pub success: bool,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error, or the launch error description on failure
    pub stderr: String,
    /// Wall-clock time from launch to report
    pub elapsed: Duration,
}

impl JobReport {
    /// Append this report to the file at `path`, creating it if needed.
    pub fn append_to(&self, path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "Elapsed time: {}", format_elapsed(self.elapsed))?;
        writeln!(file, "Your job looked like:")?;
        writeln!(file, "{}", self.command)?;
        if self.success {
            writeln!(file, "Successfully completed.")?;
        } else {
            writeln!(file, "Job failed with an error: {}.", self.stderr)?;
        }
        writeln!(file, "The output (if any) follows:")?;
        writeln!(file, "Process stdout was:")?;
        writeln!(file, "{}", self.stdout)?;
        writeln!(file, "Process stderr was:")?;
        writeln!(file, "{}", self.stderr)?;
        file.sync_all()?;
        debug!("report appended to {}", path.display());
        Ok(())
    }
}

/// Format a duration as `D days H:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{days} days {hours}:{minutes:02}:{seconds:02}")
}
