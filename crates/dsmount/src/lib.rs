//! dsmount: supervises a worker process that exposes a dataset as a local
//! directory.
//!
//! The supervisor serializes a [`MountRequest`] for a freshly spawned
//! worker, waits for the worker to create a readiness sentinel under the
//! mount point, retries with a forced cleanup of the mount point in between,
//! and tears everything down when the [`MountHandle`] is stopped or dropped.

pub mod cleanup;
pub mod cli;
pub mod config;
pub mod error;
pub mod launcher;
pub mod mount;
pub mod params;
pub mod readiness;
pub mod relay;
pub mod request;
pub mod retry;
pub mod supervisor;
pub mod teardown;
pub mod trace_context;

pub use cleanup::{force_clear, MountPointReset, RecreateDir};
pub use config::{SupervisorConfig, DEFAULT_SENTINEL_NAME};
pub use error::{ErrorKind, MountError, Result};
pub use launcher::{LaunchedWorker, ProcessLauncher, WorkerLauncher};
pub use mount::MountHandle;
pub use params::{read_descriptor, read_params, SpawnArtifacts, WorkerParams};
pub use readiness::{wait_for_ready, Readiness, ReadinessSchedule};
pub use relay::{DiscardRelay, OutputRelay, StdoutRelay};
pub use request::{Destination, MountRequest};
pub use retry::{MountState, RetryState};
pub use supervisor::{MountReport, Supervisor};
pub use teardown::{StepOutcome, TeardownReport, Unmounter};
pub use trace_context::TraceContext;
