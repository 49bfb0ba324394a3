//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::DeployerError;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), DeployerError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Create the directory with owner-only permissions on Unix
    pub async fn create_private(&self) -> Result<(), DeployerError> {
        fs::create_dir_all(&self.path).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(&self.path).await?;
            let mut perms = meta.permissions();
            perms.set_mode(0o700);
            fs::set_permissions(&self.path, perms).await?;
        }
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), DeployerError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List files in the directory (non-recursive), sorted by name
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, DeployerError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> crate::filesys::file::File {
        crate::filesys::file::File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Copy this directory tree into `dest`, returning every copied file.
    /// Each file is staged next to its destination and renamed into place,
    /// so a crash mid-copy never leaves a partial file at the final path.
    /// Permission bits are preserved by the copy.
    pub async fn copy_tree_to(&self, dest: &Path) -> Result<Vec<PathBuf>, DeployerError> {
        let mut copied = Vec::new();
        let mut stack = vec![(self.path.clone(), dest.to_path_buf())];

        while let Some((src, dst)) = stack.pop() {
            fs::create_dir_all(&dst).await?;
            let mut entries = fs::read_dir(&src).await?;
            while let Some(entry) = entries.next_entry().await? {
                let from = entry.path();
                let to = dst.join(entry.file_name());
                if entry.file_type().await?.is_dir() {
                    stack.push((from, to));
                } else {
                    let staged = dst.join(format!(
                        ".{}.tmp-{}",
                        entry.file_name().to_string_lossy(),
                        std::process::id()
                    ));
                    fs::copy(&from, &staged).await?;
                    fs::rename(&staged, &to).await?;
                    copied.push(to);
                }
            }
        }

        copied.sort();
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_tree_preserves_structure() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        std::fs::create_dir_all(src.path().join("a/b")).unwrap();
        std::fs::write(src.path().join("top.txt"), "top").unwrap();
        std::fs::write(src.path().join("a/b/deep.txt"), "deep").unwrap();

        let dir = Dir::new(src.path());
        let copied = dir.copy_tree_to(&dst.path().join("out")).await.unwrap();

        assert_eq!(copied.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dst.path().join("out/a/b/deep.txt")).unwrap(),
            "deep"
        );
    }

    #[tokio::test]
    async fn test_copy_tree_leaves_no_staging_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/file.txt"), "data").unwrap();

        let out = dst.path().join("out");
        Dir::new(src.path()).copy_tree_to(&out).await.unwrap();

        let mut leftovers = Vec::new();
        let mut stack = vec![out];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap().filter_map(|e| e.ok()) {
                if entry.file_type().unwrap().is_dir() {
                    stack.push(entry.path());
                } else if entry.file_name().to_string_lossy().contains(".tmp-") {
                    leftovers.push(entry.path());
                }
            }
        }
        assert!(leftovers.is_empty());
    }
}
