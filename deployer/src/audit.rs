//! Deployment audit log
//!
//! One JSON object per line, appended to `deployment.log` in the target
//! directory. Every run appends exactly one entry, success or failure;
//! an unwritable log never fails the deployment itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::catalog::preset::Preset;
use crate::errors::DeployerError;
use crate::storage::layout::TargetLayout;
use crate::utils;

/// The operation a log entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Install,
    Update,
    Rollback,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Install => f.write_str("install"),
            Operation::Update => f.write_str("update"),
            Operation::Rollback => f.write_str("rollback"),
        }
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Failure,
    DryRun,
}

/// One line of the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLogEntry {
    pub operation: Operation,
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    pub files_copied: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub actor: String,
    pub host: String,
}

impl DeploymentLogEntry {
    pub fn new(operation: Operation, status: OperationStatus) -> Self {
        Self {
            operation,
            status,
            timestamp: Utc::now(),
            duration_ms: 0,
            preset: None,
            models: Vec::new(),
            files_copied: 0,
            backup_created: None,
            error_message: None,
            actor: utils::actor_name(),
            host: utils::host_name(),
        }
    }
}

/// Appends entries to the target's audit log
#[derive(Debug, Clone)]
pub struct AuditLogger {
    layout: TargetLayout,
}

impl AuditLogger {
    pub fn new(layout: TargetLayout) -> Self {
        Self { layout }
    }

    /// Append one entry. Errors propagate so the caller can decide to
    /// log-and-continue.
    pub async fn append(&self, entry: &DeploymentLogEntry) -> Result<(), DeployerError> {
        let path = self.layout.audit_log();
        if let Some(parent) = path.path().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!("audit entry appended: {} {:?}", entry.operation, entry.status);
        Ok(())
    }

    /// Read back every entry, oldest first, skipping unparseable lines
    pub async fn read_all(&self) -> Result<Vec<DeploymentLogEntry>, DeployerError> {
        let path = self.layout.audit_log();
        if !path.exists().await {
            return Ok(Vec::new());
        }
        let contents = path.read_string().await?;
        Ok(contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
