//! Mount orchestration: launch the worker, wait for readiness, retry with a
//! forced cleanup of the mount point in between.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::time::Instant;

use crate::cleanup::{force_clear, MountPointReset, RecreateDir};
use crate::config::SupervisorConfig;
use crate::error::{MountError, Result};
use crate::launcher::{terminate, ProcessLauncher, WorkerLauncher};
use crate::mount::MountHandle;
use crate::params::{write_artifacts, WorkerParams};
use crate::readiness::{wait_for_ready, ReadinessSchedule};
use crate::relay::{DiscardRelay, OutputRelay, StdoutRelay};
use crate::request::MountRequest;
use crate::retry::{MountState, RetryState};
use crate::trace_context::TraceContext;

/// Subdirectory of the scratch dir holding spawn artifacts.
pub const SPAWN_DIR: &str = ".spawn";

/// Diagnostics for a successful mount call.
#[derive(Debug, Clone)]
pub struct MountReport {
    pub launches: u32,
    pub readiness_checks: u32,
    /// Time the last readiness wait took.
    pub ready_after: Duration,
    pub total_elapsed: Duration,
    pub worker_session_id: Option<String>,
    pub history: Vec<MountState>,
}

/// A worker that passed the readiness handshake.
#[derive(Debug)]
pub(crate) struct ReadyWorker {
    pub child: Child,
    pub report: MountReport,
}

/// Supervises dataset mounts. Cheap to clone; clones share the same seams.
#[derive(Clone)]
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    launcher: Arc<dyn WorkerLauncher>,
    relay: Arc<dyn OutputRelay>,
    reset: Arc<dyn MountPointReset>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        let relay: Arc<dyn OutputRelay> = if config.relay_output {
            Arc::new(StdoutRelay)
        } else {
            Arc::new(DiscardRelay)
        };
        Ok(Supervisor {
            launcher: Arc::new(ProcessLauncher::from_config(&config)),
            relay,
            reset: Arc::new(RecreateDir),
            config: Arc::new(config),
        })
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_relay(mut self, relay: Arc<dyn OutputRelay>) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_reset(mut self, reset: Arc<dyn MountPointReset>) -> Self {
        self.reset = reset;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Mount `request` and return the entered handle.
    pub async fn mount(&self, request: MountRequest) -> Result<MountHandle> {
        let mut handle = MountHandle::new(self.clone(), request);
        handle.start().await?;
        Ok(handle)
    }

    fn schedule(&self) -> ReadinessSchedule {
        ReadinessSchedule::new(
            self.config.readiness_base_delay(),
            self.config.readiness_max_attempts,
        )
    }

    /// Run the launch/wait cycle up to `max_mount_attempts` times.
    pub(crate) async fn run_attempts(
        &self,
        request: &MountRequest,
        scratch_dir: &Path,
    ) -> Result<ReadyWorker> {
        request.validate()?;

        let schedule = self.schedule();
        let mut retry = RetryState::new(self.config.max_mount_attempts, schedule.max_total());
        let trace = request
            .parent_trace()
            .map(TraceContext::child)
            .unwrap_or_else(TraceContext::root);
        let correlation_id = request.correlation_id();
        let spawn_dir = scratch_dir.join(SPAWN_DIR);
        let started = Instant::now();

        std::fs::create_dir_all(request.target())?;
        remove_stale_sentinel(request.target(), &self.config.sentinel_name)?;
        let created_scratch = !scratch_dir.exists();
        std::fs::create_dir_all(scratch_dir)?;

        let result = loop {
            let attempt = retry.begin_launch();
            tracing::info!(
                "Launching worker for {} (attempt {}/{}, correlation id {})",
                request.target().display(),
                attempt,
                retry.max_attempts,
                correlation_id
            );

            let params =
                WorkerParams::from_request(request, scratch_dir, &self.config.sentinel_name, &trace);
            let artifacts = match write_artifacts(&params, request.descriptor(), &spawn_dir, attempt)
            {
                Ok(artifacts) => artifacts,
                Err(e) => break Err(e),
            };

            let mut worker = match self.launcher.launch(&artifacts) {
                Ok(worker) => worker,
                Err(e) => {
                    artifacts.discard_params();
                    break Err(e);
                }
            };

            if let Some(output) = worker.output.take() {
                self.relay.relay(Box::new(output), relay_label(correlation_id, attempt));
            }

            retry.awaiting_ready();
            let waited = wait_for_ready(
                request.target(),
                &self.config.sentinel_name,
                schedule,
                &artifacts,
                correlation_id,
            )
            .await;

            match waited {
                Ok(readiness) => {
                    retry.on_ready();
                    break Ok(ReadyWorker {
                        child: worker.child,
                        report: MountReport {
                            launches: attempt,
                            readiness_checks: readiness.attempts,
                            ready_after: readiness.elapsed,
                            total_elapsed: started.elapsed(),
                            worker_session_id: readiness.session_id,
                            history: retry.history().to_vec(),
                        },
                    });
                }
                Err(mut e) => {
                    if let MountError::ReadinessTimeout {
                        launches, elapsed, ..
                    } = &mut e
                    {
                        *launches = attempt;
                        *elapsed = started.elapsed();
                    }
                    self.stop_worker(&mut worker.child).await;

                    if !e.is_retryable() || !retry.can_retry() {
                        break Err(e);
                    }

                    tracing::warn!(
                        "Worker for {} not ready, clearing mount point before retry: {}",
                        request.target().display(),
                        e
                    );
                    let budget = self.config.force_clear_budget();
                    let cleared = force_clear(
                        self.reset.clone(),
                        request.target().to_path_buf(),
                        budget,
                    )
                    .await;
                    if !cleared {
                        break Err(MountError::CleanupTimedOut {
                            mountpoint: request.target().display().to_string(),
                            budget,
                            correlation_id: correlation_id.to_string(),
                        });
                    }
                }
            }
        };

        if let Err(e) = &result {
            retry.on_failed(e.to_string());
            // Only remove a scratch dir this call created.
            let leftover = if created_scratch { scratch_dir } else { spawn_dir.as_path() };
            if let Err(rm) = std::fs::remove_dir_all(leftover) {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {}: {}", leftover.display(), rm);
                }
            }
        }
        result
    }

    async fn stop_worker(&self, child: &mut Child) {
        match terminate(child, self.config.kill_grace()).await {
            Ok(Some(status)) => tracing::info!("Worker exited: {}", status),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to kill worker: {}", e),
        }
    }
}

/// Delete a sentinel left behind by an earlier worker, so only the worker
/// launched now can signal readiness.
fn remove_stale_sentinel(target: &Path, sentinel_name: &str) -> Result<()> {
    let sentinel = target.join(sentinel_name);
    match std::fs::remove_file(&sentinel) {
        Ok(()) => {
            tracing::warn!("Removed stale readiness sentinel {}", sentinel.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::error!("Cannot remove stale sentinel {}: {}", sentinel.display(), e);
            Err(e.into())
        }
    }
}

fn relay_label(correlation_id: &str, attempt: u32) -> String {
    let short: String = correlation_id.chars().take(8).collect();
    format!("{}-{}", short, attempt)
}
