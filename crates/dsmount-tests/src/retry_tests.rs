//! Retry and escalation tests for the mount supervisor
//!
//! Every test spawns real `/bin/sh` workers, so they are unix-only.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use dsmount::{MountError, MountRequest, MountState, ProcessLauncher, Supervisor};

use crate::harness::{CountingLauncher, StubBehavior, StuckReset, TestEnv};

#[tokio::test]
async fn test_never_ready_times_out_after_all_launches() {
    let env = TestEnv::new("never_ready");
    let supervisor = env.supervisor(StubBehavior::NeverReady);
    let request = MountRequest::new(env.mount_point()).with_correlation_id("corr-never");

    let err = supervisor.mount(request).await.unwrap_err();

    match &err {
        MountError::ReadinessTimeout {
            mountpoint,
            elapsed,
            launches,
            attempts,
            correlation_id,
        } => {
            assert_eq!(*launches, 3);
            assert_eq!(*attempts, 6);
            // Three full waits of 20ms * (1 + .. + 6).
            assert!(*elapsed >= Duration::from_millis(3 * 420));
            assert_eq!(correlation_id, "corr-never");
            assert!(mountpoint.ends_with("mnt"));
        }
        other => panic!("expected readiness timeout, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert_eq!(err.exit_code(), 2);
    assert_eq!(env.launches(), 3);
    assert!(!env.scratch_root().join("corr-never").exists());
}

#[tokio::test]
async fn test_stale_sentinel_does_not_count_as_ready() {
    let env = TestEnv::new("stale_sentinel");
    std::fs::create_dir_all(env.mount_point()).unwrap();
    std::fs::write(
        env.mount_point().join(dsmount::DEFAULT_SENTINEL_NAME),
        "old-session\n",
    )
    .unwrap();
    let supervisor = env.supervisor(StubBehavior::NeverReady);

    let err = supervisor
        .mount(MountRequest::new(env.mount_point()))
        .await
        .unwrap_err();

    assert!(matches!(err, MountError::ReadinessTimeout { launches: 3, .. }));
    assert_eq!(env.launches(), 3);
}

#[tokio::test]
async fn test_stale_sentinel_is_replaced_by_new_session() {
    let env = TestEnv::new("stale_then_ready");
    std::fs::create_dir_all(env.mount_point()).unwrap();
    std::fs::write(
        env.mount_point().join(dsmount::DEFAULT_SENTINEL_NAME),
        "old-session\n",
    )
    .unwrap();
    let supervisor = env.supervisor(StubBehavior::ReadyOnLaunch(1));

    let mut handle = supervisor
        .mount(MountRequest::new(env.mount_point()))
        .await
        .unwrap();

    assert_eq!(
        handle.report().unwrap().worker_session_id.as_deref(),
        Some("session-1")
    );
    handle.stop();
}

#[tokio::test]
async fn test_worker_that_exits_immediately_is_retried() {
    let env = TestEnv::new("exits");
    let supervisor = env.supervisor(StubBehavior::ExitImmediately);

    let err = supervisor
        .mount(MountRequest::new(env.mount_point()))
        .await
        .unwrap_err();

    assert!(matches!(err, MountError::ReadinessTimeout { launches: 3, .. }));
    assert_eq!(env.launches(), 3);
}

#[tokio::test]
async fn test_ready_on_second_launch() {
    let env = TestEnv::new("second");
    let supervisor = env.supervisor(StubBehavior::ReadyOnLaunch(2));

    let mut handle = supervisor
        .mount(MountRequest::new(env.mount_point()))
        .await
        .unwrap();

    let report = handle.report().unwrap().clone();
    assert_eq!(report.launches, 2);
    assert_eq!(report.worker_session_id.as_deref(), Some("session-2"));
    assert_eq!(report.history.first(), Some(&MountState::Idle));
    assert_eq!(report.history[1], MountState::Launching { attempt: 1 });
    assert_eq!(report.history.last(), Some(&MountState::Ready { attempt: 2 }));
    assert_eq!(env.launches(), 2);

    assert!(handle.stop().unwrap().is_clean());
}

#[tokio::test]
async fn test_ready_on_last_launch() {
    let env = TestEnv::new("last");
    let supervisor = env.supervisor(StubBehavior::ReadyOnLaunch(3));

    let mut handle = supervisor
        .mount(MountRequest::new(env.mount_point()))
        .await
        .unwrap();

    assert_eq!(handle.report().unwrap().launches, 3);
    assert_eq!(env.launches(), 3);
    handle.stop();
}

#[tokio::test]
async fn test_spawn_failure_is_not_retried() {
    let env = TestEnv::new("spawn_failure");
    let stub = env.write_stub(&StubBehavior::NeverReady, dsmount::DEFAULT_SENTINEL_NAME);
    let config = env.config(&stub);
    let launcher = Arc::new(CountingLauncher::new(Arc::new(ProcessLauncher::new(
        "/nonexistent/dsmount-worker",
        Vec::new(),
    ))));
    let supervisor = Supervisor::new(config)
        .unwrap()
        .with_launcher(launcher.clone());

    let err = supervisor
        .mount(MountRequest::new(env.mount_point()).with_correlation_id("corr-spawn"))
        .await
        .unwrap_err();

    match &err {
        MountError::Spawn { program, .. } => {
            assert_eq!(program, "/nonexistent/dsmount-worker");
        }
        other => panic!("expected spawn error, got {:?}", other),
    }
    assert!(!err.is_retryable());
    assert_eq!(err.exit_code(), 3);
    assert_eq!(launcher.calls(), 1);
    assert!(!env.scratch_root().join("corr-spawn").exists());
}

#[tokio::test]
async fn test_stuck_cleanup_escalates_without_relaunch() {
    let env = TestEnv::new("stuck_cleanup");
    let stub = env.write_stub(&StubBehavior::NeverReady, dsmount::DEFAULT_SENTINEL_NAME);
    let config = dsmount::SupervisorConfig {
        force_clear_budget_ms: 100,
        ..env.config(&stub)
    };
    let supervisor = Supervisor::new(config)
        .unwrap()
        .with_reset(Arc::new(StuckReset(Duration::from_secs(3))));

    let err = supervisor
        .mount(MountRequest::new(env.mount_point()).with_correlation_id("corr-stuck"))
        .await
        .unwrap_err();

    match &err {
        MountError::CleanupTimedOut {
            budget,
            correlation_id,
            ..
        } => {
            assert_eq!(*budget, Duration::from_millis(100));
            assert_eq!(correlation_id, "corr-stuck");
        }
        other => panic!("expected cleanup timeout, got {:?}", other),
    }
    assert!(!err.is_retryable());
    assert_eq!(err.exit_code(), 4);
    assert_eq!(env.launches(), 1);
    assert!(!env.scratch_root().join("corr-stuck").exists());
}

#[tokio::test]
async fn test_invalid_request_never_launches() {
    let env = TestEnv::new("invalid");
    let supervisor = env.supervisor(StubBehavior::NeverReady);

    let err = supervisor
        .mount(MountRequest::new("relative/mnt"))
        .await
        .unwrap_err();

    assert!(matches!(err, MountError::InvalidRequest { .. }));
    assert_eq!(err.exit_code(), 64);
    assert_eq!(env.launches(), 0);
}
