use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::invoker::InvocationError;
use crate::domain::repositories::PersistenceError;

/// Errors returned by every engine operation
///
/// Presentation layers translate these into their own surface (HTTP status,
/// exit code) using [`EngineError::kind`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Invocation(String),

    #[error("{0}")]
    Planning(String),

    #[error("{0}")]
    Timeout(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Stable, serializable classification of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ValidationError,
    InvocationError,
    PlanningError,
    Timeout,
    PersistenceError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::InvocationError => "invocation_error",
            ErrorKind::PlanningError => "planning_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PersistenceError => "persistence_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Validation(_) => ErrorKind::ValidationError,
            EngineError::Invocation(_) => ErrorKind::InvocationError,
            EngineError::Planning(_) => ErrorKind::PlanningError,
            EngineError::Timeout(_) => ErrorKind::Timeout,
            EngineError::Persistence(_) => ErrorKind::PersistenceError,
        }
    }

    pub fn agent_not_found(agent_id: &str) -> Self {
        EngineError::NotFound(format!("Agent '{}' not found", agent_id))
    }

    pub fn task_not_found(task_id: impl fmt::Display) -> Self {
        EngineError::NotFound(format!("Task {} not found", task_id))
    }

    pub fn workflow_not_found(workflow_id: impl fmt::Display) -> Self {
        EngineError::NotFound(format!("Workflow {} not found", workflow_id))
    }
}

impl From<InvocationError> for EngineError {
    fn from(err: InvocationError) -> Self {
        EngineError::Invocation(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
