//! Best-effort teardown of an entered mount.
//!
//! Each step is independent: a failed unmount does not stop the worker from
//! being killed, which does not stop the directories from being removed.
//! Failures are logged and reported, never returned as errors.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::process::{Command, Stdio};
use tokio::process::Child;

use crate::launcher::terminate_now;
use crate::mount::MountHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Skipped,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub unmount: StepOutcome,
    pub worker: StepOutcome,
    pub mount_dir: StepOutcome,
    pub scratch_dir: StepOutcome,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        !(self.unmount.is_failed()
            || self.worker.is_failed()
            || self.mount_dir.is_failed()
            || self.scratch_dir.is_failed())
    }
}

/// Runs external unmount commands in order until one succeeds.
#[derive(Debug, Clone)]
pub struct Unmounter {
    commands: Vec<Vec<String>>,
}

impl Unmounter {
    pub fn new(commands: Vec<Vec<String>>) -> Self {
        Unmounter { commands }
    }

    pub fn unmount(&self, target: &Path) -> StepOutcome {
        let mut failures = Vec::new();

        for command in self.commands.iter().filter(|c| !c.is_empty()) {
            let program = &command[0];
            let output = Command::new(program)
                .args(&command[1..])
                .arg(target)
                .stdin(Stdio::null())
                .output();

            match output {
                Ok(out) if out.status.success() => {
                    tracing::info!("Unmounted {} with {}", target.display(), program);
                    return StepOutcome::Done;
                }
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    tracing::warn!(
                        "{} {} failed ({}): {}",
                        program,
                        target.display(),
                        out.status,
                        stderr.trim()
                    );
                    failures.push(format!("{}: {}", program, out.status));
                }
                Err(e) => {
                    tracing::warn!("Could not run {}: {}", program, e);
                    failures.push(format!("{}: {}", program, e));
                }
            }
        }

        if failures.is_empty() {
            StepOutcome::Skipped
        } else {
            StepOutcome::Failed(failures.join("; "))
        }
    }
}

fn stop_worker(worker: &mut Option<Child>) -> StepOutcome {
    match worker.take() {
        Some(mut child) => {
            let pid = child.id();
            match terminate_now(&mut child) {
                Ok(()) => {
                    tracing::info!("Terminated worker pid {:?}", pid);
                    StepOutcome::Done
                }
                Err(e) => {
                    tracing::warn!("Failed to terminate worker pid {:?}: {}", pid, e);
                    StepOutcome::Failed(e.to_string())
                }
            }
        }
        None => {
            tracing::warn!("No worker process to terminate, handle was inconsistent");
            StepOutcome::Skipped
        }
    }
}

fn remove_dir(path: &Path, what: &str) -> StepOutcome {
    if !path.exists() {
        return StepOutcome::Skipped;
    }
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::info!("Removed {} {}", what, path.display());
            StepOutcome::Done
        }
        Err(e) => {
            tracing::warn!("Failed to remove {} {}: {}", what, path.display(), e);
            StepOutcome::Failed(e.to_string())
        }
    }
}

/// Run one step, turning a panic into a failed outcome.
fn guarded<F: FnOnce() -> StepOutcome>(name: &str, step: F) -> StepOutcome {
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!("Teardown step {} panicked", name);
            StepOutcome::Failed(format!("{} panicked", name))
        }
    }
}

/// Tear down `handle` if it is entered. Always leaves it not entered.
pub fn teardown(handle: &mut MountHandle) -> Option<TeardownReport> {
    if !handle.entered {
        tracing::debug!(
            "Teardown of {} skipped, handle not entered",
            handle.target.display()
        );
        return None;
    }

    tracing::info!(
        "Tearing down {} (correlation id {})",
        handle.target.display(),
        handle.correlation_id
    );

    let unmount = guarded("unmount", || handle.unmounter.unmount(&handle.target));
    let worker = guarded("worker", || stop_worker(&mut handle.worker));
    let mount_dir = guarded("mount_dir", || remove_dir(&handle.target, "mount point"));
    let scratch_dir = guarded("scratch_dir", || remove_dir(&handle.scratch_dir, "scratch dir"));

    handle.entered = false;

    let report = TeardownReport {
        unmount,
        worker,
        mount_dir,
        scratch_dir,
    };
    if report.is_clean() {
        tracing::info!("Teardown of {} complete", handle.target.display());
    } else {
        tracing::warn!("Teardown of {} finished with errors: {:?}", handle.target.display(), report);
    }
    Some(report)
}
