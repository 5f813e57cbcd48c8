//! Worker process launch and termination.

use std::collections::BTreeMap;
use std::io::PipeReader;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

use crate::config::SupervisorConfig;
use crate::error::{MountError, Result};
use crate::params::SpawnArtifacts;

/// Set in the worker's environment; the worker must flush output per line.
pub const UNBUFFERED_ENV: &str = "DSMOUNT_UNBUFFERED";

/// A running worker and the read end of its combined stdout/stderr.
#[derive(Debug)]
pub struct LaunchedWorker {
    pub child: Child,
    pub output: Option<PipeReader>,
}

pub trait WorkerLauncher: Send + Sync {
    /// Start the worker and return without waiting for it.
    fn launch(&self, artifacts: &SpawnArtifacts) -> Result<LaunchedWorker>;
}

/// Spawns the configured worker executable.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        ProcessLauncher {
            program: program.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        ProcessLauncher {
            program: config.worker_program.clone(),
            args: config.worker_args.clone(),
            env: config.worker_env.clone(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn spawn_error(&self, source: std::io::Error) -> MountError {
        MountError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, artifacts: &SpawnArtifacts) -> Result<LaunchedWorker> {
        let (reader, writer) = std::io::pipe().map_err(|e| self.spawn_error(e))?;
        let stderr_writer = writer.try_clone().map_err(|e| self.spawn_error(e))?;

        // Command holds the write ends; it must be dropped right after spawn
        // so the reader sees EOF once the worker exits.
        let child = {
            let mut cmd = Command::new(&self.program);
            cmd.args(&self.args)
                .arg(&artifacts.descriptor_path)
                .arg(&artifacts.params_path)
                .envs(&self.env)
                .env(UNBUFFERED_ENV, "1")
                .stdin(Stdio::null())
                .stdout(writer)
                .stderr(stderr_writer)
                .kill_on_drop(true);
            cmd.spawn().map_err(|e| self.spawn_error(e))?
        };

        tracing::info!(
            "Spawned worker {} (pid {:?})",
            self.program.display(),
            child.id()
        );

        Ok(LaunchedWorker {
            child,
            output: Some(reader),
        })
    }
}

/// Kill the worker and wait up to `grace` for it to exit.
///
/// Returns `Ok(None)` if it had not exited by the deadline.
pub async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<Option<ExitStatus>> {
    if let Some(status) = child.try_wait()? {
        return Ok(Some(status));
    }
    child.start_kill()?;
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map(Some),
        Err(_) => {
            tracing::warn!(
                "Worker pid {:?} did not exit within {:?} after kill",
                child.id(),
                grace
            );
            Ok(None)
        }
    }
}

/// Non-blocking variant for teardown: signal the worker, do not wait.
/// The runtime reaps it in the background.
pub fn terminate_now(child: &mut Child) -> std::io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    child.start_kill()
}
