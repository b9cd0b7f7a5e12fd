use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::State;

/// Failure raised by one of the external collaborators.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("preparation failed: {0}")]
    Preparation(String),

    #[error("service quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("status probe failed: {0}")]
    Probe(String),

    #[error("result persistence failed: {0}")]
    Persist(String),

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StepError {
    /// Only quota exhaustion on the provider side is worth waiting out.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::QuotaExceeded(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Preparation(_) => ErrorKind::Preparation,
            StepError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            StepError::Dispatch(_) => ErrorKind::Dispatch,
            StepError::Probe(_) => ErrorKind::Probe,
            StepError::Persist(_) => ErrorKind::Persist,
            StepError::Notify(_) => ErrorKind::Notify,
            StepError::Io(_) => ErrorKind::Io,
            StepError::Json(_) => ErrorKind::Json,
        }
    }
}

/// Serializable classification of a [`StepError`], kept on the job context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Preparation,
    QuotaExceeded,
    Dispatch,
    Probe,
    Persist,
    Notify,
    Io,
    Json,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Preparation => "Preparation",
            ErrorKind::QuotaExceeded => "QuotaExceeded",
            ErrorKind::Dispatch => "Dispatch",
            ErrorKind::Probe => "Probe",
            ErrorKind::Persist => "Persist",
            ErrorKind::Notify => "Notify",
            ErrorKind::Io => "Io",
            ErrorKind::Json => "Json",
        };
        write!(f, "{name}")
    }
}

/// Error info recorded on the job context when a step fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&StepError> for ErrorInfo {
    fn from(err: &StepError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Fatal errors that abort a workflow instance.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("input preparation failed: {0}")]
    Preparation(#[source] StepError),

    #[error("dispatch failed after {attempts} attempt(s): {source}")]
    Dispatch {
        attempts: u32,
        #[source]
        source: StepError,
    },

    #[error("status probe failed: {0}")]
    Probe(#[source] StepError),

    #[error("result persistence failed: {0}")]
    Persist(#[source] StepError),

    #[error("job did not reach a terminal status within {}s", waited.as_secs())]
    TimedOut { waited: Duration },

    #[error("invalid transition from {from} on {event}")]
    InvalidTransition { from: State, event: String },

    #[error("job context violation: {0}")]
    ContextViolation(&'static str),
}

impl WorkflowError {
    /// The collaborator error that triggered the abort, if any.
    pub fn step_error(&self) -> Option<&StepError> {
        match self {
            WorkflowError::Preparation(e)
            | WorkflowError::Probe(e)
            | WorkflowError::Persist(e)
            | WorkflowError::Dispatch { source: e, .. } => Some(e),
            WorkflowError::TimedOut { .. }
            | WorkflowError::InvalidTransition { .. }
            | WorkflowError::ContextViolation(_) => None,
        }
    }
}
