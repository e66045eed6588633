//! Error taxonomy for the worker side of the protocol.

use std::time::Duration;

use growth_sdk::ErrorKind;

/// Why an analysis run aborted
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("phase {phase} ({name}) exceeded its {budget:?} budget")]
    PhaseTimeout {
        phase: u8,
        name: &'static str,
        budget: Duration,
    },

    #[error("phase {phase} ({name}) failed: {source}")]
    Phase {
        phase: u8,
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid profile: {0}")]
    InvalidProfile(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::PhaseTimeout { .. } => ErrorKind::Timeout,
            PipelineError::Phase { .. } => ErrorKind::Worker,
            PipelineError::InvalidProfile(_) => ErrorKind::Input,
        }
    }
}

/// Failure of one dispatched action, mapped onto an error frame
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Input(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ActionError {
    pub fn input(message: impl Into<String>) -> Self {
        ActionError::Input(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::Input(_) => ErrorKind::Input,
            ActionError::Pipeline(e) => e.kind(),
            ActionError::Internal(_) => ErrorKind::Worker,
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(e: serde_json::Error) -> Self {
        ActionError::Input(format!("invalid payload: {}", e))
    }
}
