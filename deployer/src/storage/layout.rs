//! Target directory layout

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::utils;

/// Fixed layout of a deployed gateway target directory
#[derive(Debug, Clone)]
pub struct TargetLayout {
    /// Target root for this deployment
    pub root: PathBuf,
}

impl TargetLayout {
    /// Create a new target layout
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the target root as a directory
    pub fn root_dir(&self) -> Dir {
        Dir::new(&self.root)
    }

    /// Get the config directory
    pub fn config_dir(&self) -> Dir {
        Dir::new(self.root.join("config"))
    }

    /// Get the merged gateway document path
    pub fn config_file(&self) -> File {
        File::new(self.root.join("config").join("litellm.yaml"))
    }

    /// Get the resolved environment file
    pub fn env_file(&self) -> File {
        File::new(self.root.join(".env"))
    }

    /// Get the backups directory
    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.root.join("backups"))
    }

    /// Get the generated startup script
    pub fn start_script(&self) -> File {
        File::new(self.root.join("start-gateway.sh"))
    }

    /// Get the append-only audit log
    pub fn audit_log(&self) -> File {
        File::new(self.root.join("deployment.log"))
    }

    /// Get the advisory lock path. The lock lives next to the target, not
    /// inside it, so backups never archive it and rollback swaps never
    /// move it.
    pub fn lock_path(&self) -> PathBuf {
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "gateway".to_string());
        match self.root.parent() {
            Some(parent) => parent.join(format!(".{}.lock", name)),
            None => self.root.join(".deploy.lock"),
        }
    }

    /// Whether a prior deployment exists at this target
    pub async fn is_deployed(&self) -> bool {
        self.config_file().exists().await
    }
}

impl Default for TargetLayout {
    fn default() -> Self {
        let root = utils::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".llm-gateway");
        Self::new(root)
    }
}
