use std::time::Duration;
use thiserror::Error;

/// Coarse classification used by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The worker did not signal readiness in time. Retryable.
    Timeout,
    /// Anything else. Never retried.
    Fatal,
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error(
        "Mount point {mountpoint} was not ready after {elapsed:?} ({attempts} checks, {launches} launch(es), correlation id {correlation_id}). \
         Make sure FUSE is installed and /dev/fuse is accessible to this user."
    )]
    ReadinessTimeout {
        mountpoint: String,
        elapsed: Duration,
        attempts: u32,
        launches: u32,
        correlation_id: String,
    },

    #[error("Failed to spawn worker {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize mount parameters: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Mount point {mountpoint} could not be cleared within {budget:?}, not retrying (correlation id {correlation_id})")]
    CleanupTimedOut {
        mountpoint: String,
        budget: Duration,
        correlation_id: String,
    },

    #[error("Invalid mount request: {msg}")]
    InvalidRequest { msg: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MountError>;

impl MountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MountError::ReadinessTimeout { .. } => ErrorKind::Timeout,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Process exit code the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            MountError::ReadinessTimeout { .. } => 2,
            MountError::Spawn { .. } => 3,
            MountError::CleanupTimedOut { .. } => 4,
            MountError::InvalidRequest { .. } => 64,
            MountError::Serialize(_) => 1,
            MountError::Io(_) => 1,
        }
    }
}
