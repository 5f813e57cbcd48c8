//! Parameter channel between supervisor and worker.
//!
//! The worker is started as `worker <descriptor-path> <params-path>`. The
//! descriptor is written raw (empty file when the request carries none); the
//! params blob is JSON and is deleted by the supervisor as soon as the
//! readiness wait ends.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::request::{Destination, MountRequest};
use crate::trace_context::TraceContext;

/// Everything the worker needs besides the dataset descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerParams {
    pub mount_point: PathBuf,
    pub stream_column: String,
    pub base_path: Option<String>,
    pub options: BTreeMap<String, String>,
    pub correlation_id: String,
    pub caller_session_id: String,
    /// `CLOCK_MONOTONIC` reading taken just before spawn, in nanoseconds.
    pub spawn_monotonic_ns: u64,
    pub spawn_unix_ms: u64,
    pub destination: Option<Destination>,
    pub traceparent: String,
    pub cache_dir: PathBuf,
    pub sentinel_name: String,
}

impl WorkerParams {
    pub fn from_request(
        request: &MountRequest,
        cache_dir: &Path,
        sentinel_name: &str,
        trace: &TraceContext,
    ) -> Self {
        WorkerParams {
            mount_point: request.target().to_path_buf(),
            stream_column: request.stream_column().to_string(),
            base_path: request.base_path().map(str::to_string),
            options: request.options().clone(),
            correlation_id: request.correlation_id().to_string(),
            caller_session_id: request.caller_session_id().to_string(),
            spawn_monotonic_ns: monotonic_now_ns(),
            spawn_unix_ms: unix_now_ms(),
            destination: request.destination().cloned(),
            traceparent: trace.to_traceparent(),
            cache_dir: cache_dir.to_path_buf(),
            sentinel_name: sentinel_name.to_string(),
        }
    }
}

/// Files handed to one worker launch.
#[derive(Debug)]
pub struct SpawnArtifacts {
    pub descriptor_path: PathBuf,
    pub params_path: PathBuf,
}

impl SpawnArtifacts {
    /// Delete the params blob. Missing file is not an error.
    pub fn discard_params(&self) {
        match fs::remove_file(&self.params_path) {
            Ok(()) => tracing::debug!("Removed params blob {}", self.params_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove params blob {}: {}",
                self.params_path.display(),
                e
            ),
        }
    }
}

/// Write descriptor and params for launch number `attempt` into `dir`.
pub fn write_artifacts(
    params: &WorkerParams,
    descriptor: Option<&[u8]>,
    dir: &Path,
    attempt: u32,
) -> Result<SpawnArtifacts> {
    fs::create_dir_all(dir)?;

    let descriptor_path = dir.join(format!("dataset-{}.bin", attempt));
    let params_path = dir.join(format!("params-{}.json", attempt));

    let blob = serde_json::to_vec(params)?;
    write_private(&descriptor_path, descriptor.unwrap_or_default())?;
    write_private(&params_path, &blob)?;

    Ok(SpawnArtifacts {
        descriptor_path,
        params_path,
    })
}

/// Worker side: decode a params blob.
pub fn read_params(path: &Path) -> Result<WorkerParams> {
    let contents = fs::read(path)?;
    Ok(serde_json::from_slice(&contents)?)
}

/// Worker side: read the descriptor, `None` when absent or empty.
pub fn read_descriptor(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(None),
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn monotonic_now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64)
}

#[cfg(not(unix))]
fn monotonic_now_ns() -> u64 {
    0
}

fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
