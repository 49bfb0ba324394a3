//! Backup and restore
//!
//! Backups are tar.gz archives of the target directory stored under
//! `backups/` inside the target itself, with a JSON metadata sidecar per
//! archive. Restore is two-phase: extract and validate in a staging
//! directory first, then swap directories atomically.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::app::options::DeploymentConfig;
use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::storage::layout::TargetLayout;
use crate::utils;

/// Backups beyond this count are pruned, oldest first
pub const MAX_BACKUPS: usize = 5;

/// Archive filename prefix
const BACKUP_PREFIX: &str = "gateway-backup-";

/// Top-level entries never archived. Backups must not nest earlier
/// backups, and docs are recoverable from the source tree.
const EXCLUDED_TOP_LEVEL: [&str; 2] = ["backups", "docs"];

/// Metadata recorded alongside each archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub filename: String,
    pub filepath: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub checksum: String,
    pub valid: bool,
    /// The deployment configuration active when the backup was taken,
    /// absent for safety backups taken during restore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<DeploymentConfig>,
}

/// How the user names the backup to restore
#[derive(Debug, Clone)]
pub enum BackupRef {
    Latest,
    Named(String),
}

/// Manages the backup archive set for one target directory
#[derive(Debug, Clone)]
pub struct BackupManager {
    layout: TargetLayout,
}

impl BackupManager {
    pub fn new(layout: TargetLayout) -> Self {
        Self { layout }
    }

    /// Archive the current target state. Returns `None` when nothing is
    /// deployed yet (a fresh install has nothing to protect).
    pub async fn backup(
        &self,
        config: Option<&DeploymentConfig>,
    ) -> Result<Option<BackupMetadata>, DeployerError> {
        if !self.layout.is_deployed().await {
            debug!("no deployment at {}, skipping backup", self.layout.root.display());
            return Ok(None);
        }

        let backups = self.layout.backups_dir();
        backups.create().await?;

        let archive_path = self.fresh_archive_path(&backups.path().to_path_buf()).await;
        let root = self.layout.root.clone();
        let archive_for_task = archive_path.clone();
        tokio::task::spawn_blocking(move || create_archive_sync(&root, &archive_for_task))
            .await
            .map_err(|e| DeployerError::Internal(format!("archive task panicked: {}", e)))??;

        // The archive must be readable back before it counts
        let verify_path = archive_path.clone();
        let entry_count = tokio::task::spawn_blocking(move || verify_archive_sync(&verify_path))
            .await
            .map_err(|e| DeployerError::Internal(format!("verify task panicked: {}", e)))?
            .map_err(|e| {
                DeployerError::Backup(format!(
                    "archive {} failed verification: {}",
                    archive_path.display(),
                    e
                ))
            })?;

        let bytes = File::new(&archive_path).read_bytes().await?;
        let metadata = BackupMetadata {
            filename: archive_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            filepath: archive_path.clone(),
            created_at: Utc::now(),
            size_bytes: bytes.len() as u64,
            checksum: utils::sha256_hash(&bytes),
            valid: true,
            config: config.cloned(),
        };

        File::new(sidecar_path(&archive_path))
            .write_json(&metadata)
            .await?;
        info!(
            "backup {} created ({} entries, {})",
            metadata.filename,
            entry_count,
            utils::format_bytes(metadata.size_bytes)
        );

        self.rotate().await?;
        Ok(Some(metadata))
    }

    /// List known backups, newest first
    pub async fn list(&self) -> Result<Vec<BackupMetadata>, DeployerError> {
        let backups = self.layout.backups_dir();
        if !backups.exists().await {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for path in self.archive_paths().await? {
            let sidecar = File::new(sidecar_path(&path));
            let metadata = if sidecar.exists().await {
                sidecar.read_json::<BackupMetadata>().await?
            } else {
                // An archive without its sidecar is still restorable
                let size = fs::metadata(&path).await?.len();
                BackupMetadata {
                    filename: path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    filepath: path.clone(),
                    created_at: Utc::now(),
                    size_bytes: size,
                    checksum: String::new(),
                    valid: false,
                    config: None,
                }
            };
            found.push(metadata);
        }

        found.sort_by(|a, b| b.filename.cmp(&a.filename));
        Ok(found)
    }

    /// Phase one of restore: verify the archive, take a safety backup of
    /// the live state, and extract into a staging directory on the same
    /// filesystem as the target. Nothing live is touched until
    /// [`PendingRestore::commit`].
    pub async fn prepare_restore(
        &self,
        reference: &BackupRef,
    ) -> Result<PendingRestore, DeployerError> {
        let metadata = self.find(reference).await?;

        if !metadata.checksum.is_empty() {
            let bytes = File::new(&metadata.filepath).read_bytes().await?;
            let actual = utils::sha256_hash(&bytes);
            if actual != metadata.checksum {
                return Err(DeployerError::Rollback(format!(
                    "backup {} checksum mismatch: recorded {}, actual {}",
                    metadata.filename, metadata.checksum, actual
                )));
            }
        }

        // Extract before the safety backup: the safety backup rotates the
        // archive set and could prune the one being restored.
        let staging = staging_path(&self.layout.root);
        if fs::metadata(&staging).await.is_ok() {
            fs::remove_dir_all(&staging).await?;
        }
        fs::create_dir_all(&staging).await?;

        let archive = metadata.filepath.clone();
        let staging_for_task = staging.clone();
        tokio::task::spawn_blocking(move || extract_archive_sync(&archive, &staging_for_task))
            .await
            .map_err(|e| DeployerError::Internal(format!("extract task panicked: {}", e)))?
            .map_err(|e| {
                DeployerError::Rollback(format!(
                    "extraction of {} failed: {}",
                    metadata.filename, e
                ))
            })?;

        if let Some(safety) = self.backup(None).await? {
            info!("safety backup {} taken before restore", safety.filename);
        }

        Ok(PendingRestore {
            target: self.layout.root.clone(),
            staging,
            metadata,
        })
    }

    async fn find(&self, reference: &BackupRef) -> Result<BackupMetadata, DeployerError> {
        let known = self.list().await?;
        match reference {
            BackupRef::Latest => known.into_iter().next().ok_or_else(|| {
                DeployerError::Backup(format!(
                    "no backups exist under {}",
                    self.layout.backups_dir().path().display()
                ))
            }),
            BackupRef::Named(name) => known
                .into_iter()
                .find(|m| m.filename == *name || m.filename == format!("{}.tar.gz", name))
                .ok_or_else(|| {
                    DeployerError::Backup(format!(
                        "no backup named '{}'; run list-backups to see what exists",
                        name
                    ))
                }),
        }
    }

    /// Prune archives beyond [`MAX_BACKUPS`], oldest first. Filenames
    /// embed the creation timestamp, so name order is age order.
    async fn rotate(&self) -> Result<(), DeployerError> {
        let mut archives = self.archive_paths().await?;
        archives.sort_by(|a, b| b.cmp(a));

        for stale in archives.iter().skip(MAX_BACKUPS) {
            debug!("pruning old backup {}", stale.display());
            File::new(stale).delete().await?;
            File::new(sidecar_path(stale)).delete().await?;
        }
        Ok(())
    }

    async fn archive_paths(&self) -> Result<Vec<PathBuf>, DeployerError> {
        let mut archives = Vec::new();
        for path in self.layout.backups_dir().list_files().await? {
            let name = path.file_name().map(|n| n.to_string_lossy().to_string());
            if let Some(name) = name {
                if name.starts_with(BACKUP_PREFIX) && name.ends_with(".tar.gz") {
                    archives.push(path);
                }
            }
        }
        Ok(archives)
    }

    /// Next archive path, with a numeric suffix when two backups land in
    /// the same second
    async fn fresh_archive_path(&self, backups_dir: &PathBuf) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let base = backups_dir.join(format!("{}{}.tar.gz", BACKUP_PREFIX, stamp));
        if fs::metadata(&base).await.is_err() {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = backups_dir.join(format!("{}{}-{}.tar.gz", BACKUP_PREFIX, stamp, n));
            if fs::metadata(&candidate).await.is_err() {
                return candidate;
            }
            n += 1;
        }
    }
}

/// An extracted-but-not-committed restore
#[derive(Debug)]
pub struct PendingRestore {
    target: PathBuf,
    staging: PathBuf,
    pub metadata: BackupMetadata,
}

impl PendingRestore {
    /// Root of the staging extraction, for validation before commit
    pub fn staging_root(&self) -> &Path {
        &self.staging
    }

    /// Swap the staging directory into place. The live tree is renamed
    /// aside first and only deleted once the swap has succeeded; backups
    /// are carried over since archives never contain them.
    pub async fn commit(self) -> Result<BackupMetadata, DeployerError> {
        let aside = retired_path(&self.target);
        if fs::metadata(&aside).await.is_ok() {
            fs::remove_dir_all(&aside).await?;
        }

        fs::rename(&self.target, &aside).await?;
        if let Err(e) = fs::rename(&self.staging, &self.target).await {
            // Put the live tree back before reporting
            if let Err(undo) = fs::rename(&aside, &self.target).await {
                return Err(DeployerError::Rollback(format!(
                    "swap failed ({}) and the live tree could not be restored ({}); \
                     previous state is at {}",
                    e,
                    undo,
                    aside.display()
                )));
            }
            return Err(DeployerError::Rollback(format!(
                "could not move staging into place: {}",
                e
            )));
        }

        let aside_backups = aside.join("backups");
        if fs::metadata(&aside_backups).await.is_ok() {
            let live_backups = self.target.join("backups");
            if fs::metadata(&live_backups).await.is_ok() {
                fs::remove_dir_all(&live_backups).await?;
            }
            fs::rename(&aside_backups, &live_backups).await?;
        }

        if let Err(e) = fs::remove_dir_all(&aside).await {
            warn!("could not remove retired tree {}: {}", aside.display(), e);
        }
        info!("restored {} into {}", self.metadata.filename, self.target.display());
        Ok(self.metadata)
    }

    /// Discard the staging extraction; the live tree was never touched
    pub async fn abort(self) -> Result<(), DeployerError> {
        if fs::metadata(&self.staging).await.is_ok() {
            fs::remove_dir_all(&self.staging).await?;
        }
        Ok(())
    }
}

fn sidecar_path(archive: &Path) -> PathBuf {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "backup.tar.gz".to_string());
    archive.with_file_name(format!("{}.meta.json", name))
}

/// Staging lives next to the target so the final rename never crosses a
/// filesystem boundary
fn staging_path(target: &Path) -> PathBuf {
    sibling(target, "restore")
}

fn retired_path(target: &Path) -> PathBuf {
    sibling(target, "old")
}

fn sibling(target: &Path, tag: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "gateway".to_string());
    match target.parent() {
        Some(parent) => parent.join(format!(".{}.{}-{}", name, tag, std::process::id())),
        None => target.join(format!(".{}-{}", tag, std::process::id())),
    }
}

fn create_archive_sync(root: &Path, archive_path: &Path) -> Result<(), DeployerError> {
    let file = std::fs::File::create(archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut entries: Vec<_> = std::fs::read_dir(root)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if EXCLUDED_TOP_LEVEL.contains(&name.as_ref()) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            builder.append_dir_all(name.as_ref(), &path)?;
        } else {
            builder.append_path_with_name(&path, name.as_ref())?;
        }
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

fn verify_archive_sync(archive_path: &Path) -> Result<usize, DeployerError> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut count = 0;
    for entry in archive.entries()? {
        entry?;
        count += 1;
    }
    Ok(count)
}

fn extract_archive_sync(archive_path: &Path, dest: &Path) -> Result<(), DeployerError> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive.unpack(dest)?;
    Ok(())
}
