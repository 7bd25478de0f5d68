//! Orchestration error taxonomy

use thiserror::Error;

use crate::llm::{LlmError, ParseError};
use crate::policy::PolicyViolation;
use crate::state::StateError;

/// Errors surfaced by the task runner, process runner, queue and scheduler
#[derive(Debug, Error)]
pub enum OpsError {
    /// Structured response still unparseable after every permitted attempt
    #[error("Response rejected after {attempts} attempt(s): {source}")]
    Validation {
        attempts: u32,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    PolicyViolation(#[from] PolicyViolation),

    /// Control-flow pause signal
    #[error("Task {task_id} awaits approval {approval_id}")]
    ApprovalRequired { task_id: i64, approval_id: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(#[from] LlmError),

    /// A Task Runner cycle driven by a Step failed or completed no Task
    #[error("Run {run_id} failed: {error}")]
    CycleFailed { run_id: i64, error: String },

    /// Quality gate still failing after the one permitted correction
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("State error: {0}")]
    State(StateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StateError> for OpsError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => Self::NotFound(what),
            other => Self::State(other),
        }
    }
}

impl From<handlebars::RenderError> for OpsError {
    fn from(err: handlebars::RenderError) -> Self {
        Self::Template(err.to_string())
    }
}

pub type OpsResult<T> = Result<T, OpsError>;
