//! Supervisor configuration.
//!
//! Loaded from TOML or JSON; every field has a default so a partial file is
//! enough.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MountError, Result};

/// Readiness sentinel file name, created by the worker under the mount point.
pub const DEFAULT_SENTINEL_NAME: &str = ".sentinel";

const MAX_READINESS_CHECKS: u32 = 1000;
const MAX_READINESS_BASE_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Worker executable.
    pub worker_program: PathBuf,
    /// Arguments placed before the descriptor and params paths.
    pub worker_args: Vec<String>,
    pub sentinel_name: String,
    pub readiness_base_delay_ms: u64,
    pub readiness_max_attempts: u32,
    pub max_mount_attempts: u32,
    pub force_clear_budget_ms: u64,
    pub kill_grace_ms: u64,
    /// Unmount commands tried in order; the mount point is appended as the
    /// last argument.
    pub unmount_commands: Vec<Vec<String>>,
    /// Parent of per-mount scratch directories.
    pub scratch_root: PathBuf,
    pub relay_output: bool,
    /// Extra environment for the worker.
    pub worker_env: BTreeMap<String, String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker_program: PathBuf::from("dsmount-worker"),
            worker_args: Vec::new(),
            worker_env: BTreeMap::new(),
            sentinel_name: DEFAULT_SENTINEL_NAME.to_string(),
            readiness_base_delay_ms: 500,
            readiness_max_attempts: 12,
            max_mount_attempts: 3,
            force_clear_budget_ms: 10_000,
            kill_grace_ms: 2_000,
            unmount_commands: default_unmount_commands(),
            scratch_root: std::env::temp_dir().join("dsmount"),
            relay_output: true,
        }
    }
}

#[cfg(target_os = "macos")]
fn default_unmount_commands() -> Vec<Vec<String>> {
    vec![
        vec!["umount".to_string()],
        vec!["diskutil".to_string(), "unmount".to_string(), "force".to_string()],
    ]
}

#[cfg(not(target_os = "macos"))]
fn default_unmount_commands() -> Vec<Vec<String>> {
    vec![
        vec!["fusermount".to_string(), "-u".to_string()],
        vec!["umount".to_string(), "-l".to_string()],
    ]
}

impl SupervisorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: SupervisorConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> {
            Err(MountError::InvalidRequest {
                msg: msg.to_string(),
            })
        };

        if self.worker_program.as_os_str().is_empty() {
            return invalid("worker_program cannot be empty");
        }
        if self.sentinel_name.is_empty() || self.sentinel_name.contains('/') {
            return invalid("sentinel_name must be a plain file name");
        }
        if self.readiness_max_attempts == 0 || self.readiness_max_attempts > MAX_READINESS_CHECKS {
            return invalid("readiness_max_attempts must be between 1 and 1000");
        }
        if self.readiness_base_delay_ms > MAX_READINESS_BASE_DELAY_MS {
            return invalid("readiness_base_delay_ms must be at most 60000");
        }
        if self.max_mount_attempts == 0 {
            return invalid("max_mount_attempts must be at least 1");
        }
        if self.unmount_commands.iter().all(|c| c.is_empty()) {
            return invalid("at least one unmount command is required");
        }
        Ok(())
    }

    pub fn readiness_base_delay(&self) -> Duration {
        Duration::from_millis(self.readiness_base_delay_ms)
    }

    pub fn force_clear_budget(&self) -> Duration {
        Duration::from_millis(self.force_clear_budget_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Upper bound on one readiness wait: `base * n * (n + 1) / 2`.
    pub fn max_readiness_wait(&self) -> Duration {
        let n = u64::from(self.readiness_max_attempts);
        let steps = n * (n + 1) / 2;
        Duration::from_millis(self.readiness_base_delay_ms.saturating_mul(steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = SupervisorConfig::default();
        assert_eq!(config.sentinel_name, ".sentinel");
        assert_eq!(config.readiness_base_delay_ms, 500);
        assert_eq!(config.readiness_max_attempts, 12);
        assert_eq!(config.max_mount_attempts, 3);
        assert_eq!(config.unmount_commands.len(), 2);
        assert!(config.relay_output);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let mut config = SupervisorConfig::default();
        config.worker_env.insert("RUST_LOG".to_string(), "info".to_string());

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SupervisorConfig = toml::from_str(&text).unwrap();

        assert_eq!(parsed.unmount_commands, config.unmount_commands);
        assert_eq!(parsed.worker_env, config.worker_env);
        assert_eq!(parsed.scratch_root, config.scratch_root);
    }

    #[test]
    fn test_max_readiness_wait_default_is_39s() {
        let config = SupervisorConfig::default();
        assert_eq!(config.max_readiness_wait(), Duration::from_secs(39));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = SupervisorConfig {
            max_mount_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MountError::InvalidRequest { .. })
        ));

        let config = SupervisorConfig {
            readiness_max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_caps_readiness_schedule() {
        let config = SupervisorConfig {
            readiness_max_attempts: u32::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SupervisorConfig {
            readiness_base_delay_ms: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.max_readiness_wait(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_validate_rejects_nested_sentinel() {
        let config = SupervisorConfig {
            sentinel_name: "a/b".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_unmount_commands() {
        let config = SupervisorConfig {
            unmount_commands: vec![vec![]],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_toml_partial() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
worker_program = "/usr/local/bin/ds-worker"
worker_args = ["--fuse"]
max_mount_attempts = 5
readiness_base_delay_ms = 250

[worker_env]
RUST_LOG = "debug"
"#
        )
        .unwrap();

        let config = SupervisorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.worker_program, PathBuf::from("/usr/local/bin/ds-worker"));
        assert_eq!(config.worker_args, vec!["--fuse"]);
        assert_eq!(config.max_mount_attempts, 5);
        assert_eq!(config.readiness_base_delay(), Duration::from_millis(250));
        assert_eq!(config.worker_env.get("RUST_LOG").map(String::as_str), Some("debug"));
        assert_eq!(config.readiness_max_attempts, 12);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{ "sentinel_name": ".ready", "kill_grace_ms": 100, "relay_output": false }}"#
        )
        .unwrap();

        let config = SupervisorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sentinel_name, ".ready");
        assert_eq!(config.kill_grace(), Duration::from_millis(100));
        assert!(!config.relay_output);
    }

    #[test]
    fn test_from_file_unknown_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(SupervisorConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "max_mount_attempts = 0").unwrap();
        assert!(SupervisorConfig::from_file(file.path()).is_err());
    }
}
