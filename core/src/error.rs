//! Core error types and utilities

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced synchronously by the spawn gate and the lock file layer.
///
/// Command-level failures are not represented here: once the daemon is
/// confirmed, a job that fails to launch or run is recovered into the report
/// file and never reaches the caller of [`crate::spawn`].
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("a lock file already exists at {0}")]
    AlreadyRunning(PathBuf),

    #[error("fork failed: {0}")]
    ForkFailure(nix::errno::Errno),

    #[error("could not acquire lock file {0} within the acquisition timeout")]
    LockTimeout(PathBuf),

    #[error("detached process not confirmed after {0} retries")]
    SpawnTimeout(u32),

    #[error("lock file path must be absolute: {0}")]
    LockPathNotAbsolute(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            SpawnError::AlreadyRunning(_) => "SPWN001",
            SpawnError::ForkFailure(_) => "SPWN002",
            SpawnError::LockTimeout(_) => "SPWN003",
            SpawnError::SpawnTimeout(_) => "SPWN004",
            SpawnError::LockPathNotAbsolute(_) => "SPWN005",
            SpawnError::Io(_) => "SPWN006",
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, SpawnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SpawnError::AlreadyRunning(PathBuf::from("/tmp/a.lock")).code(),
            "SPWN001"
        );
        assert_eq!(
            SpawnError::ForkFailure(nix::errno::Errno::EAGAIN).code(),
            "SPWN002"
        );
        assert_eq!(
            SpawnError::LockTimeout(PathBuf::from("/tmp/a.lock")).code(),
            "SPWN003"
        );
        assert_eq!(SpawnError::SpawnTimeout(3).code(), "SPWN004");
        assert_eq!(
            SpawnError::LockPathNotAbsolute(PathBuf::from("a.lock")).code(),
            "SPWN005"
        );
    }

    #[test]
    fn test_error_display() {
        let error = SpawnError::AlreadyRunning(PathBuf::from("/tmp/job.lock"));
        assert_eq!(
            error.to_string(),
            "a lock file already exists at /tmp/job.lock"
        );

        let error = SpawnError::SpawnTimeout(3);
        assert_eq!(
            error.to_string(),
            "detached process not confirmed after 3 retries"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: SpawnError = io.into();
        assert_eq!(error.code(), "SPWN006");
    }
}
