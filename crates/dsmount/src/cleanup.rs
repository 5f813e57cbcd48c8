//! Forced clearing of a possibly stuck mount point between attempts.
//!
//! Recursive removal can hang on a half-mounted FUSE path, so the reset runs
//! on its own OS thread and the caller only waits for it up to a budget.
//! A thread that misses the budget is abandoned, not cancelled: it may keep
//! running after the caller has moved on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub trait MountPointReset: Send + Sync + 'static {
    /// Leave `path` as an empty directory. May block.
    fn reset(&self, path: &Path) -> std::io::Result<()>;
}

/// `remove_dir_all` then `create_dir_all`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecreateDir;

impl MountPointReset for RecreateDir {
    fn reset(&self, path: &Path) -> std::io::Result<()> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        std::fs::create_dir_all(path)
    }
}

/// Reset `path` on a detached thread, waiting at most `budget`.
///
/// Returns true only if the reset finished in time and succeeded.
pub async fn force_clear(reset: Arc<dyn MountPointReset>, path: PathBuf, budget: Duration) -> bool {
    let (tx, rx) = oneshot::channel();
    let thread_path = path.clone();

    let spawned = std::thread::Builder::new()
        .name("dsmount-force-clear".to_string())
        .spawn(move || {
            let result = reset.reset(&thread_path);
            if tx.send(result).is_err() {
                tracing::warn!(
                    "Abandoned reset of {} finished after its budget",
                    thread_path.display()
                );
            }
        });
    if let Err(e) = spawned {
        tracing::error!("Could not start reset thread for {}: {}", path.display(), e);
        return false;
    }

    match tokio::time::timeout(budget, rx).await {
        Ok(Ok(Ok(()))) => {
            tracing::info!("Cleared mount point {}", path.display());
            true
        }
        Ok(Ok(Err(e))) => {
            tracing::error!("Failed to clear mount point {}: {}", path.display(), e);
            false
        }
        Ok(Err(_)) => {
            tracing::error!("Reset thread for {} exited without a result", path.display());
            false
        }
        Err(_) => {
            tracing::error!(
                "Clearing mount point {} did not finish within {:?}",
                path.display(),
                budget
            );
            false
        }
    }
}
