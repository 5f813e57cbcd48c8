//! Mount handle lifecycle.
//!
//! A `MountHandle` is entered by a successful `start()` and left by `stop()`
//! or by being dropped. Teardown runs exactly once per entry.

use std::path::{Path, PathBuf};
use tokio::process::Child;
use tracing::Instrument;

use crate::error::Result;
use crate::request::MountRequest;
use crate::supervisor::{MountReport, Supervisor};
use crate::teardown::{teardown, TeardownReport, Unmounter};

#[derive(Debug)]
pub struct MountHandle {
    supervisor: Supervisor,
    request: MountRequest,
    pub(crate) target: PathBuf,
    pub(crate) worker: Option<Child>,
    pub(crate) scratch_dir: PathBuf,
    pub(crate) entered: bool,
    pub(crate) correlation_id: String,
    pub(crate) unmounter: Unmounter,
    report: Option<MountReport>,
}

impl MountHandle {
    /// Create a handle for `request`. Nothing is mounted until `start()`.
    pub fn new(supervisor: Supervisor, request: MountRequest) -> Self {
        let config = supervisor.config();
        let scratch_dir = request.scratch_dir_under(&config.scratch_root);
        let unmounter = Unmounter::new(config.unmount_commands.clone());
        MountHandle {
            target: request.target().to_path_buf(),
            correlation_id: request.correlation_id().to_string(),
            worker: None,
            scratch_dir,
            entered: false,
            unmounter,
            report: None,
            supervisor,
            request,
        }
    }

    /// Mount the dataset. A no-op on an already entered handle.
    pub async fn start(&mut self) -> Result<()> {
        if self.entered {
            tracing::info!(
                "Mount {} already entered, ignoring start (correlation id {})",
                self.target.display(),
                self.correlation_id
            );
            return Ok(());
        }

        let span = tracing::info_span!(
            "mount",
            correlation_id = %self.correlation_id,
            target = %self.target.display()
        );
        let ready = self
            .supervisor
            .run_attempts(&self.request, &self.scratch_dir)
            .instrument(span)
            .await?;

        tracing::info!(
            "Mounted {} after {} launch(es) in {:?}",
            self.target.display(),
            ready.report.launches,
            ready.report.total_elapsed
        );
        self.worker = Some(ready.child);
        self.report = Some(ready.report);
        self.entered = true;
        Ok(())
    }

    /// Tear the mount down. Returns `None` if the handle was not entered.
    pub fn stop(&mut self) -> Option<TeardownReport> {
        teardown(self)
    }

    pub fn is_entered(&self) -> bool {
        self.entered
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn report(&self) -> Option<&MountReport> {
        self.report.as_ref()
    }

    pub fn worker_pid(&self) -> Option<u32> {
        self.worker.as_ref().and_then(Child::id)
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if self.entered {
            tracing::info!(
                "Mount handle for {} dropped while entered, tearing down",
                self.target.display()
            );
            teardown(self);
        }
    }
}
