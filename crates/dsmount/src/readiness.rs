//! Readiness handshake.
//!
//! The worker signals that its filesystem is servable by creating a sentinel
//! file directly under the mount point. The supervisor polls for it with a
//! linearly growing delay: check `k` sleeps `base * k` first, so the total
//! wait is bounded by `base * n * (n + 1) / 2`.

use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{MountError, Result};
use crate::params::SpawnArtifacts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessSchedule {
    pub base: Duration,
    pub max_attempts: u32,
}

impl ReadinessSchedule {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        ReadinessSchedule { base, max_attempts }
    }

    /// Sleep before check `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt)
    }

    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn max_total(&self) -> Duration {
        let n = u64::from(self.max_attempts);
        let steps = n * (n + 1) / 2;
        self.base
            .saturating_mul(u32::try_from(steps).unwrap_or(u32::MAX))
    }
}

impl Default for ReadinessSchedule {
    fn default() -> Self {
        ReadinessSchedule::new(Duration::from_millis(500), 12)
    }
}

/// What the supervisor observed when the worker became ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// First line of the sentinel, if it could be read.
    pub session_id: Option<String>,
    pub elapsed: Duration,
    pub attempts: u32,
}

pub fn is_ready(target: &Path, sentinel_name: &str) -> bool {
    target.is_dir() && target.join(sentinel_name).exists()
}

/// Poll until the sentinel shows up or the schedule runs out.
///
/// The params blob in `artifacts` is deleted before returning on every path.
pub async fn wait_for_ready(
    target: &Path,
    sentinel_name: &str,
    schedule: ReadinessSchedule,
    artifacts: &SpawnArtifacts,
    correlation_id: &str,
) -> Result<Readiness> {
    let result = poll(target, sentinel_name, schedule, correlation_id).await;
    artifacts.discard_params();
    result
}

async fn poll(
    target: &Path,
    sentinel_name: &str,
    schedule: ReadinessSchedule,
    correlation_id: &str,
) -> Result<Readiness> {
    let started = Instant::now();

    for attempt in 1..=schedule.max_attempts {
        tokio::time::sleep(schedule.delay_for(attempt)).await;

        if is_ready(target, sentinel_name) {
            let elapsed = started.elapsed();
            let session_id = read_session_id(&target.join(sentinel_name));
            tracing::info!(
                "Mount {} ready after {:?} ({} checks, worker session {:?})",
                target.display(),
                elapsed,
                attempt,
                session_id
            );
            return Ok(Readiness {
                session_id,
                elapsed,
                attempts: attempt,
            });
        }

        tracing::debug!(
            "Mount {} not ready yet (check {}/{})",
            target.display(),
            attempt,
            schedule.max_attempts
        );
    }

    let elapsed = started.elapsed();
    tracing::warn!(
        "Mount {} not ready after {:?} ({} checks)",
        target.display(),
        elapsed,
        schedule.max_attempts
    );
    Err(MountError::ReadinessTimeout {
        mountpoint: target.display().to_string(),
        elapsed,
        attempts: schedule.max_attempts,
        launches: 1,
        correlation_id: correlation_id.to_string(),
    })
}

fn read_session_id(sentinel: &Path) -> Option<String> {
    match std::fs::read_to_string(sentinel) {
        Ok(contents) => contents
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty()),
        Err(e) => {
            tracing::warn!("Could not read sentinel {}: {}", sentinel.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn artifacts_in(dir: &Path) -> SpawnArtifacts {
        let params_path = dir.join("params-1.json");
        std::fs::write(&params_path, b"{\"secret\":true}").unwrap();
        SpawnArtifacts {
            descriptor_path: dir.join("dataset-1.bin"),
            params_path,
        }
    }

    #[test]
    fn test_schedule_delays_grow_linearly() {
        let schedule = ReadinessSchedule::default();
        assert_eq!(schedule.delay_for(1), Duration::from_millis(500));
        assert_eq!(schedule.delay_for(2), Duration::from_millis(1000));
        assert_eq!(schedule.delay_for(12), Duration::from_secs(6));
    }

    #[test]
    fn test_schedule_total_is_39s_for_default() {
        assert_eq!(ReadinessSchedule::default().max_total(), Duration::from_secs(39));
    }

    #[test]
    fn test_schedule_total_saturates() {
        let schedule = ReadinessSchedule::new(Duration::from_secs(u64::MAX / 2), u32::MAX);
        assert_eq!(schedule.max_total(), Duration::MAX);
        assert_eq!(schedule.delay_for(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_is_ready_requires_dir_and_sentinel() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("mnt");
        assert!(!is_ready(&target, ".sentinel"));

        std::fs::create_dir(&target).unwrap();
        assert!(!is_ready(&target, ".sentinel"));

        std::fs::write(target.join(".sentinel"), "s\n").unwrap();
        assert!(is_ready(&target, ".sentinel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_full_schedule() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("mnt");
        std::fs::create_dir(&target).unwrap();
        let artifacts = artifacts_in(dir.path());

        let started = Instant::now();
        let err = wait_for_ready(
            &target,
            ".sentinel",
            ReadinessSchedule::default(),
            &artifacts,
            "corr-1",
        )
        .await
        .unwrap_err();

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(39));
        assert!(waited < Duration::from_millis(39_100));
        match err {
            MountError::ReadinessTimeout {
                elapsed,
                attempts,
                correlation_id,
                ..
            } => {
                assert!(elapsed >= Duration::from_secs(39));
                assert_eq!(attempts, 12);
                assert_eq!(correlation_id, "corr-1");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(!artifacts.params_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_when_sentinel_appears_after_two_seconds() {
        let dir = tempdir().unwrap();
        let target: PathBuf = dir.path().join("ds1");
        std::fs::create_dir(&target).unwrap();
        let artifacts = artifacts_in(dir.path());

        let writer_target = target.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            std::fs::write(writer_target.join(".sentinel"), "session-42\n").unwrap();
        });

        let ready = wait_for_ready(
            &target,
            ".sentinel",
            ReadinessSchedule::default(),
            &artifacts,
            "corr-1",
        )
        .await
        .unwrap();

        assert_eq!(ready.session_id.as_deref(), Some("session-42"));
        assert!(ready.elapsed >= Duration::from_secs(2));
        assert!(ready.elapsed < Duration::from_millis(3_100));
        assert_eq!(ready.attempts, 3);
        assert!(!artifacts.params_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_sentinel_is_still_ready() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("mnt");
        std::fs::create_dir_all(target.join(".sentinel")).unwrap();
        let artifacts = artifacts_in(dir.path());

        let ready = wait_for_ready(
            &target,
            ".sentinel",
            ReadinessSchedule::new(Duration::from_millis(10), 3),
            &artifacts,
            "corr-1",
        )
        .await
        .unwrap();

        assert_eq!(ready.session_id, None);
        assert_eq!(ready.attempts, 1);
    }
}
