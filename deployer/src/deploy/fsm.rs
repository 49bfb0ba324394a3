//! Deployment state machine
//!
//! Every run moves through these states in a fixed order. Transitions
//! not listed in [`process`] are bugs in the orchestrator and surface as
//! internal errors rather than silently skipping a phase.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DeployerError;

/// Phase of a deployment run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    Created,
    Validating,
    BackingUp,
    Deploying,
    ValidatingPost,
    RollingBack,
    Completed,
    Failed,
    DryRunComplete,
}

impl DeployState {
    /// Whether the run is over
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeployState::Completed | DeployState::Failed | DeployState::DryRunComplete
        )
    }
}

/// Events that drive the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployEvent {
    Start,
    PreValidated,
    DryRun,
    BackupDone,
    Deployed,
    PostValidated,
    PostValidationFailed(String),
    RollbackFinished,
    Fail(String),
}

/// Apply an event to a state, producing the next state
pub fn process(state: DeployState, event: DeployEvent) -> Result<DeployState, DeployerError> {
    let next = match (&state, &event) {
        (DeployState::Created, DeployEvent::Start) => DeployState::Validating,

        (DeployState::Validating, DeployEvent::PreValidated) => DeployState::BackingUp,
        (DeployState::Validating, DeployEvent::DryRun) => DeployState::DryRunComplete,

        (DeployState::BackingUp, DeployEvent::BackupDone) => DeployState::Deploying,

        (DeployState::Deploying, DeployEvent::Deployed) => DeployState::ValidatingPost,

        (DeployState::ValidatingPost, DeployEvent::PostValidated) => DeployState::Completed,
        (DeployState::ValidatingPost, DeployEvent::PostValidationFailed(_)) => {
            DeployState::RollingBack
        }

        (DeployState::RollingBack, DeployEvent::RollbackFinished) => DeployState::Failed,

        // Any non-terminal phase can fail outright
        (s, DeployEvent::Fail(_)) if !s.is_terminal() => DeployState::Failed,

        (s, e) => {
            return Err(DeployerError::Internal(format!(
                "invalid deployment transition: {:?} on {:?}",
                e, s
            )))
        }
    };

    debug!("deployment state: {:?} -> {:?}", state, next);
    Ok(next)
}
