use serde::{Deserialize, Serialize};

/// Lifecycle status of a task
///
/// # Status Transitions
/// ```text
/// Pending -> Running -> Completed
///    |          ├-----> Failed
///    |          └-----> Cancelled
///    ├-> Cancelled
///    └-> Failed
/// ```
/// Transitions only move forward; Completed, Failed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted and persisted, not yet handed to the model service
    Pending,
    /// Invocation in flight
    Running,
    /// Invocation returned a result
    Completed,
    /// Invocation returned an error or the engine went away
    Failed,
    /// Cancelled by a caller
    Cancelled,
}

impl TaskStatus {
    /// Checks if a transition from current status to next status is valid
    ///
    /// # Example
    /// ```
    /// use conclave_api::domain::task::value_objects::TaskStatus;
    ///
    /// assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
    /// assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
    /// ```
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
