//! Core functionality for jobspawn
//!
//! Spawns a shell command as a detached background process, confirms the
//! detachment through a pidfile handshake, and records the outcome to a
//! report file. Also provides read-only process inspection: enumeration of
//! kernel-visible processes from `/proc` and pid liveness probing.
//!
//! Linux-only: the process table reader depends on procfs and the spawner
//! on fork/setsid semantics.

pub mod error;
pub mod lockfile;
pub mod probe;
pub mod process;
pub mod report;
pub mod spawn;

pub use error::{Result, SpawnError};
pub use lockfile::{LockGuard, PidLock};
pub use probe::{pid_exists, process_runs};
pub use process::{ProcessRecord, ProcessTable};
pub use report::JobReport;
pub use spawn::spawn;

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::SpawnError::Io(std::io::Error::other(e.to_string())))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
