//! Shared-directory janitor.
//!
//! Invocation directories are removed by the engine on every exit path,
//! but a crashed process can still strand them. The janitor sweeps the
//! functions root periodically and removes invocation directories whose
//! last modification is older than the cutoff, then prunes the emptied
//! parents.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

pub struct SharedDirJanitor {
    root: PathBuf,
    max_age: Duration,
}

impl SharedDirJanitor {
    pub fn new(root: PathBuf, max_age: Duration) -> Self {
        Self { root, max_age }
    }

    /// Run one sweep; returns how many invocation directories were
    /// removed. A missing root is a no-op.
    pub async fn sweep_once(&self) -> std::io::Result<usize> {
        let root = self.root.clone();
        let max_age = self.max_age;
        // Directory walking is synchronous; keep it off the runtime.
        tokio::task::spawn_blocking(move || sweep(&root, max_age))
            .await
            .map_err(|e| std::io::Error::other(format!("sweep task failed: {e}")))?
    }

    /// Sweep forever on `interval`. Spawned once at startup.
    pub fn spawn(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match self.sweep_once().await {
                    Ok(0) => debug!("janitor sweep found nothing to remove"),
                    Ok(removed) => info!(removed, "janitor removed stranded invocation dirs"),
                    Err(e) => warn!(error = %e, "janitor sweep failed"),
                }
            }
        });
    }
}

fn sweep(root: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for function_dir in read_dirs(root)? {
        for version_dir in read_dirs(&function_dir)? {
            for invocation_dir in read_dirs(&version_dir)? {
                let stale = std::fs::metadata(&invocation_dir)
                    .and_then(|m| m.modified())
                    .map(|modified| modified < cutoff)
                    .unwrap_or(false);
                if stale {
                    match std::fs::remove_dir_all(&invocation_dir) {
                        Ok(()) => removed += 1,
                        Err(e) => warn!(
                            path = %invocation_dir.display(),
                            error = %e,
                            "failed to remove stranded dir"
                        ),
                    }
                }
            }
            // Prune emptied parents so the tree does not accrete.
            let _ = std::fs::remove_dir(&version_dir);
        }
        let _ = std::fs::remove_dir(&function_dir);
    }

    Ok(removed)
}

fn read_dirs(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}
