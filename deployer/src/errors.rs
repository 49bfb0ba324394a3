//! Error types for the gateway deployer

use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Insufficient disk space: {0}")]
    DiskSpace(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Source tree missing or incomplete: {0}")]
    SourceMissing(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Rollback error: {0}")]
    Rollback(String),

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Another deployment is in progress: {0}")]
    LockHeld(String),

    #[error("Deployment interrupted: {0}")]
    Interrupted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Process exit code for this error, per the documented CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployerError::Io(_) | DeployerError::Permission(_) | DeployerError::Internal(_) => 1,
            DeployerError::DiskSpace(_) => 2,
            DeployerError::InvalidArgument(_) | DeployerError::LockHeld(_) => 3,
            DeployerError::Validation(_)
            | DeployerError::Merge(_)
            | DeployerError::Json(_)
            | DeployerError::Yaml(_)
            | DeployerError::Interrupted(_) => 4,
            DeployerError::SourceMissing(_) => 5,
            DeployerError::Backup(_) | DeployerError::Rollback(_) => 6,
        }
    }

    /// A concrete next command for the user to run, when one exists.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            DeployerError::Permission(_) => {
                Some("Check ownership of the target directory, or pass --target-dir <writable path>")
            }
            DeployerError::DiskSpace(_) => Some("Free disk space, then re-run the same command"),
            DeployerError::InvalidArgument(_) => Some("Run: gwdeploy --help"),
            DeployerError::SourceMissing(_) => {
                Some("Pass --source-dir pointing at a complete configuration bundle checkout")
            }
            DeployerError::Backup(_) | DeployerError::Rollback(_) => {
                Some("Run: gwdeploy list-backups, and inspect deployment.log in the target directory")
            }
            DeployerError::Validation(_) => {
                Some("Inspect deployment.log in the target directory for the failed checks")
            }
            DeployerError::LockHeld(_) => {
                Some("Wait for the other deployment to finish, or remove the stale .lock file")
            }
            _ => None,
        }
    }
}

impl From<anyhow::Error> for DeployerError {
    fn from(err: anyhow::Error) -> Self {
        DeployerError::Internal(err.to_string())
    }
}
