//! Mount requests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{MountError, Result};
use crate::trace_context::TraceContext;

/// Where the worker should write back to, if anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    /// Serialized store reference, forwarded untouched.
    pub store: serde_json::Value,
    /// Path inside the store.
    pub path: String,
}

/// A request to expose a dataset at `target`.
///
/// Built once, then handed to the supervisor which owns it until the worker
/// receives the serialized form.
#[derive(Debug, Clone)]
pub struct MountRequest {
    target: PathBuf,
    descriptor: Option<Vec<u8>>,
    options: BTreeMap<String, String>,
    correlation_id: String,
    destination: Option<Destination>,
    stream_column: String,
    base_path: Option<String>,
    caller_session_id: String,
    parent_trace: Option<TraceContext>,
    scratch_dir: Option<PathBuf>,
}

impl MountRequest {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        MountRequest {
            target: target.into(),
            descriptor: None,
            options: BTreeMap::new(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            destination: None,
            stream_column: "Path".to_string(),
            base_path: None,
            caller_session_id: uuid::Uuid::new_v4().to_string(),
            parent_trace: None,
            scratch_dir: None,
        }
    }

    pub fn with_descriptor(mut self, descriptor: impl Into<Vec<u8>>) -> Self {
        self.descriptor = Some(descriptor.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_stream_column(mut self, column: impl Into<String>) -> Self {
        self.stream_column = column.into();
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    pub fn with_caller_session(mut self, id: impl Into<String>) -> Self {
        self.caller_session_id = id.into();
        self
    }

    pub fn with_parent_trace(mut self, parent: TraceContext) -> Self {
        self.parent_trace = Some(parent);
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn descriptor(&self) -> Option<&[u8]> {
        self.descriptor.as_deref()
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn stream_column(&self) -> &str {
        &self.stream_column
    }

    pub fn base_path(&self) -> Option<&str> {
        self.base_path.as_deref()
    }

    pub fn caller_session_id(&self) -> &str {
        &self.caller_session_id
    }

    pub fn parent_trace(&self) -> Option<&TraceContext> {
        self.parent_trace.as_ref()
    }

    /// Scratch directory for this mount, defaulting to a per-correlation
    /// directory under `root`.
    pub fn scratch_dir_under(&self, root: &Path) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| root.join(&self.correlation_id))
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.as_os_str().is_empty() {
            return Err(MountError::InvalidRequest {
                msg: "target path cannot be empty".into(),
            });
        }
        if !self.target.is_absolute() {
            return Err(MountError::InvalidRequest {
                msg: format!("target path must be absolute: {}", self.target.display()),
            });
        }
        if self.correlation_id.is_empty() {
            return Err(MountError::InvalidRequest {
                msg: "correlation id cannot be empty".into(),
            });
        }
        Ok(())
    }
}
