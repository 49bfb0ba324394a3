//! Advisory deployment lock
//!
//! One lock file per target, created with `create_new` so two deployers
//! racing for the same target cannot both win. The file holds the owner
//! pid; a lock whose owner is gone is reclaimed.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::DeployerError;

/// Held for the duration of a deployment run; released on drop
#[derive(Debug)]
pub struct DeployLock {
    path: PathBuf,
}

impl DeployLock {
    /// Acquire the lock at `path`, reclaiming it if the recorded owner
    /// process no longer exists.
    pub async fn acquire(path: &Path) -> Result<Self, DeployerError> {
        match Self::try_create(path).await {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = tokio::fs::read_to_string(path).await.unwrap_or_default();
                let holder_pid = holder.trim().parse::<u32>().ok();

                if holder_pid.map(process_alive).unwrap_or(false) {
                    return Err(DeployerError::LockHeld(format!(
                        "{} is held by pid {}",
                        path.display(),
                        holder.trim()
                    )));
                }

                warn!(
                    "reclaiming stale lock {} (owner {} is gone)",
                    path.display(),
                    holder.trim()
                );
                tokio::fs::remove_file(path).await?;
                Self::try_create(path).await.map_err(|e| {
                    DeployerError::LockHeld(format!(
                        "lost the race reclaiming {}: {}",
                        path.display(),
                        e
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn try_create(path: &Path) -> Result<Self, std::io::Error> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(std::process::id().to_string().as_bytes())
            .await?;
        file.flush().await?;
        debug!("lock acquired at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("could not release lock {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // Without a liveness probe, assume the holder is alive
    true
}
