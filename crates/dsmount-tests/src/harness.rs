//! Test Harness - temp directories and shell worker stubs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dsmount::{
    LaunchedWorker, MountPointReset, SpawnArtifacts, Supervisor, SupervisorConfig, WorkerLauncher,
};
use tempfile::TempDir;

/// How a stub worker behaves once launched.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Never creates the sentinel.
    NeverReady,
    /// Creates the sentinel from launch number `k` onwards.
    ReadyOnLaunch(u32),
    /// Sleeps, then creates the sentinel with the given first line.
    ReadyAfter { delay_secs: f32, session_id: String },
    /// Exits immediately without doing anything.
    ExitImmediately,
}

#[derive(Debug)]
pub struct TestEnv {
    temp_dir: TempDir,
    test_name: String,
}

impl TestEnv {
    pub fn new(test_name: &str) -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
        Self {
            temp_dir,
            test_name: test_name.to_string(),
        }
    }

    pub fn tempdir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn mount_point(&self) -> PathBuf {
        self.tempdir().join("mnt")
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.tempdir().join("scratch")
    }

    /// File each stub launch appends a line to.
    pub fn launch_log(&self) -> PathBuf {
        self.tempdir().join("launches.log")
    }

    /// Where stubs copy the params blob they were given.
    pub fn params_copy(&self) -> PathBuf {
        self.tempdir().join("params-copy.json")
    }

    /// Where stubs copy the dataset descriptor they were given.
    pub fn descriptor_copy(&self) -> PathBuf {
        self.tempdir().join("descriptor-copy.bin")
    }

    pub fn launches(&self) -> usize {
        std::fs::read_to_string(self.launch_log())
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Write a `/bin/sh` worker script and return its path.
    pub fn write_stub(&self, behavior: &StubBehavior, sentinel_name: &str) -> PathBuf {
        let sentinel = self.mount_point().join(sentinel_name);
        let log = self.launch_log();
        let copy = self.params_copy();
        let descriptor_copy = self.descriptor_copy();

        let body = match behavior {
            StubBehavior::NeverReady => "exec sleep 60\n".to_string(),
            StubBehavior::ReadyOnLaunch(k) => format!(
                "n=$(wc -l < '{log}')\n\
                 if [ \"$n\" -ge {k} ]; then printf 'session-%s\\n' \"$n\" > '{sentinel}'; fi\n\
                 exec sleep 60\n",
                log = log.display(),
                k = k,
                sentinel = sentinel.display()
            ),
            StubBehavior::ReadyAfter {
                delay_secs,
                session_id,
            } => format!(
                "sleep {delay}\nprintf '%s\\n' '{session}' > '{sentinel}'\nexec sleep 60\n",
                delay = delay_secs,
                session = session_id,
                sentinel = sentinel.display()
            ),
            StubBehavior::ExitImmediately => "exit 0\n".to_string(),
        };

        let script = format!(
            "echo \"launch $$\" >> '{log}'\n\
             cp \"$2\" '{copy}' 2>/dev/null\n\
             cp \"$1\" '{descriptor_copy}' 2>/dev/null\n\
             echo \"worker started with $1\"\n\
             {body}",
            log = log.display(),
            copy = copy.display(),
            descriptor_copy = descriptor_copy.display(),
            body = body
        );

        let path = self.tempdir().join(format!("{}-worker.sh", self.test_name));
        std::fs::write(&path, script).expect("failed to write worker stub");
        path
    }

    /// Config tuned for fast tests: short readiness schedule, no-op unmount.
    pub fn config(&self, stub: &Path) -> SupervisorConfig {
        SupervisorConfig {
            worker_program: PathBuf::from("/bin/sh"),
            worker_args: vec![stub.display().to_string()],
            readiness_base_delay_ms: 20,
            readiness_max_attempts: 6,
            max_mount_attempts: 3,
            force_clear_budget_ms: 2_000,
            kill_grace_ms: 2_000,
            unmount_commands: vec![vec!["true".to_string()]],
            scratch_root: self.scratch_root(),
            relay_output: false,
            ..Default::default()
        }
    }

    pub fn supervisor(&self, behavior: StubBehavior) -> Supervisor {
        let config = SupervisorConfig::default();
        let stub = self.write_stub(&behavior, &config.sentinel_name);
        Supervisor::new(self.config(&stub)).expect("valid config")
    }
}

/// Wraps a launcher and counts how often it is asked to launch, whether or
/// not the launch succeeds.
pub struct CountingLauncher {
    inner: Arc<dyn WorkerLauncher>,
    calls: AtomicU32,
}

impl CountingLauncher {
    pub fn new(inner: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            inner,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WorkerLauncher for CountingLauncher {
    fn launch(&self, artifacts: &SpawnArtifacts) -> dsmount::Result<LaunchedWorker> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.launch(artifacts)
    }
}

/// A mount point reset that hangs, like `rm -rf` on a wedged FUSE mount.
pub struct StuckReset(pub Duration);

impl MountPointReset for StuckReset {
    fn reset(&self, _path: &Path) -> std::io::Result<()> {
        std::thread::sleep(self.0);
        Ok(())
    }
}
