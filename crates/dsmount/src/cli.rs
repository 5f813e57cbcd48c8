use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::config::SupervisorConfig;
use crate::params::read_params;
use crate::request::MountRequest;
use crate::supervisor::Supervisor;
use crate::trace_context::TraceContext;

#[derive(Parser)]
#[command(name = "dsmount")]
#[command(about = "Mount a dataset through a supervised worker process", long_about = None)]
pub struct Cli {
    /// Supervisor config (.toml or .json). Defaults apply when omitted.
    #[arg(short, long, global = true, env = "DSMOUNT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Mount, wait for Ctrl-C or SIGTERM, then tear down.
    Mount {
        target: PathBuf,
        /// Dataset descriptor forwarded to the worker unchanged.
        #[arg(short, long)]
        dataset: Option<PathBuf>,
        /// Worker option, repeatable.
        #[arg(short = 'o', long = "option", value_parser = parse_option)]
        options: Vec<(String, String)>,
        #[arg(long)]
        correlation_id: Option<String>,
        #[arg(long, env = "TRACEPARENT")]
        traceparent: Option<String>,
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    ShowConfig,
    /// Decode a worker params blob.
    InspectParams { file: PathBuf },
}

fn parse_option(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

impl Cli {
    /// Run the command and return the process exit code.
    pub async fn run(self) -> Result<i32> {
        let config = load_config(self.config.as_deref())?;
        match self.command {
            Command::Mount {
                target,
                dataset,
                options,
                correlation_id,
                traceparent,
                scratch_dir,
            } => {
                let mut request = MountRequest::new(target);
                if let Some(path) = dataset {
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("reading dataset {}", path.display()))?;
                    request = request.with_descriptor(bytes);
                }
                for (key, value) in options {
                    request = request.with_option(key, value);
                }
                if let Some(id) = correlation_id {
                    request = request.with_correlation_id(id);
                }
                if let Some(parent) = traceparent.as_deref().and_then(TraceContext::from_traceparent) {
                    request = request.with_parent_trace(parent);
                }
                if let Some(dir) = scratch_dir {
                    request = request.with_scratch_dir(dir);
                }
                mount_until_interrupted(config, request).await
            }
            Command::ShowConfig => {
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(0)
            }
            Command::InspectParams { file } => {
                let params = read_params(&file)?;
                println!("{}", serde_json::to_string_pretty(&params)?);
                Ok(0)
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SupervisorConfig> {
    match path {
        Some(path) => SupervisorConfig::from_file(path),
        None => Ok(SupervisorConfig::default()),
    }
}

/// What ended the wait for a mounted dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Interrupt,
    Terminate,
}

/// Resolves on Ctrl-C or, on unix, SIGTERM. Handlers are installed before
/// this returns.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = Shutdown>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!("Could not wait for Ctrl-C: {}", e);
                }
                Shutdown::Interrupt
            }
            _ = terminate.recv() => Shutdown::Terminate,
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = Shutdown>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Could not wait for Ctrl-C: {}", e);
        }
        Shutdown::Interrupt
    })
}

async fn mount_until_interrupted(config: SupervisorConfig, request: MountRequest) -> Result<i32> {
    let supervisor = Supervisor::new(config)?;
    let shutdown = shutdown_signal().context("installing signal handlers")?;
    tokio::pin!(shutdown);

    // A signal during the mount drops the in-flight worker, which is killed
    // on drop.
    let mounted = tokio::select! {
        res = supervisor.mount(request) => res,
        signal = &mut shutdown => {
            eprintln!("dsmount: {:?} received while mounting, giving up", signal);
            return Ok(1);
        }
    };
    let mut handle = match mounted {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("dsmount: {}", e);
            return Ok(e.exit_code());
        }
    };

    println!(
        "Mounted {} (correlation id {}). Press Ctrl-C to unmount.",
        handle.target().display(),
        handle.correlation_id()
    );

    let signal = shutdown.await;
    tracing::info!("{:?} received, unmounting {}", signal, handle.target().display());

    if let Some(report) = handle.stop() {
        if !report.is_clean() {
            eprintln!("dsmount: teardown finished with errors: {:?}", report);
        }
    }
    Ok(0)
}
