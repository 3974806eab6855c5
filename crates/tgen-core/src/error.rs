//! Unified Error Model
use crate::data_model::RunId;
use crate::stage::Stage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A collaborator call failed or timed out. Recorded on the run.
    #[error("STAGE/{stage}: {message}")]
    StageExecution { stage: Stage, message: String },

    #[error("STATE/CONFLICT: run {run_id} is in {actual}, expected {expected}")]
    StateConflict {
        run_id: RunId,
        expected: String,
        actual: Stage,
    },

    #[error("STATE/ILLEGAL: {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },

    #[error("SELECTION/{0}")]
    InvalidSelection(String),

    #[error("LOCK/{0}")]
    LockContention(RunId),

    #[error("NOTFOUND/{0}")]
    NotFound(RunId),

    #[error("VALIDATION/{0}")]
    Validation(String),

    #[error("DISPATCH/{0}")]
    Dispatch(String),

    #[error("STORE/{0}")]
    Storage(String),

    #[error("CONFIG/{0}")]
    Config(String),
}

impl PipelineError {
    /// Stable taxonomy label, independent of transport.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StageExecution { .. } => "StageExecutionError",
            Self::StateConflict { .. } | Self::IllegalTransition { .. } => "StateConflict",
            Self::InvalidSelection(_) => "InvalidSelection",
            Self::LockContention(_) => "LockContention",
            Self::NotFound(_) => "NotFound",
            Self::Validation(_) => "Validation",
            Self::Dispatch(_) => "Dispatch",
            Self::Storage(_) => "Storage",
            Self::Config(_) => "Config",
        }
    }

    pub fn conflict(run_id: RunId, expected: impl Into<String>, actual: Stage) -> Self {
        Self::StateConflict {
            run_id,
            expected: expected.into(),
            actual,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
