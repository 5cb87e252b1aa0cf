use serde::Serialize;
use uuid::Uuid;

use super::value_objects::AgentStatus;

/// Domain events emitted by agent lifecycle transitions
///
/// Every state change of an agent's runtime state produces exactly one
/// event. The engine writes it to the agent's log so that transitions can
/// be observed and asserted on.
///
/// # Example
/// ```
/// use conclave_api::domain::agent::events::AgentEvent;
/// use conclave_api::domain::agent::value_objects::AgentStatus;
///
/// let event = AgentEvent::Started { from: AgentStatus::Stopped };
/// assert_eq!(event.name(), "start");
/// assert_eq!(event.to(), AgentStatus::Idle);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Agent brought from Stopped or Error to Idle by an explicit start
    Started { from: AgentStatus },
    /// A task was accepted and the agent is now busy with it
    TaskSubmitted { task_id: Uuid },
    /// The active task completed successfully
    TaskSucceeded { task_id: Uuid },
    /// The active task failed
    TaskFailed { task_id: Uuid, error: String },
    /// The agent recovered from Error on its own
    AutoRestarted { attempt: u32, max: u32 },
    /// The active task was cancelled and the agent released
    TaskCancelled { task_id: Uuid },
    /// The agent was stopped
    Stopped {
        from: AgentStatus,
        cancelled_task: Option<Uuid>,
    },
    /// The agent was running when the engine went away
    Interrupted { task_id: Option<Uuid> },
}

impl AgentEvent {
    /// Short trigger name written into log lines
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Started { .. } => "start",
            AgentEvent::TaskSubmitted { .. } => "task_submitted",
            AgentEvent::TaskSucceeded { .. } => "task_succeeded",
            AgentEvent::TaskFailed { .. } => "task_failed",
            AgentEvent::AutoRestarted { .. } => "auto_restart",
            AgentEvent::TaskCancelled { .. } => "task_cancelled",
            AgentEvent::Stopped { .. } => "stop",
            AgentEvent::Interrupted { .. } => "recovered",
        }
    }

    /// Status the agent holds after this event
    pub fn to(&self) -> AgentStatus {
        match self {
            AgentEvent::Started { .. } => AgentStatus::Idle,
            AgentEvent::TaskSubmitted { .. } => AgentStatus::Running,
            AgentEvent::TaskSucceeded { .. } => AgentStatus::Idle,
            AgentEvent::TaskFailed { .. } => AgentStatus::Error,
            AgentEvent::AutoRestarted { .. } => AgentStatus::Idle,
            AgentEvent::TaskCancelled { .. } => AgentStatus::Idle,
            AgentEvent::Stopped { .. } => AgentStatus::Stopped,
            AgentEvent::Interrupted { .. } => AgentStatus::Error,
        }
    }

    /// Human readable log line for this event
    pub fn describe(&self, from: AgentStatus) -> String {
        let head = format!("{}: {} -> {}", self.name(), from, self.to());
        match self {
            AgentEvent::TaskSubmitted { task_id }
            | AgentEvent::TaskSucceeded { task_id }
            | AgentEvent::TaskCancelled { task_id } => format!("{} (task {})", head, task_id),
            AgentEvent::TaskFailed { task_id, error } => {
                format!("{} (task {}): {}", head, task_id, error)
            }
            AgentEvent::AutoRestarted { attempt, max } => {
                format!("{} (attempt {}/{})", head, attempt, max)
            }
            AgentEvent::Stopped {
                cancelled_task: Some(task_id),
                ..
            } => format!("{} (cancelled task {})", head, task_id),
            AgentEvent::Interrupted {
                task_id: Some(task_id),
            } => format!("{} (task {} interrupted by engine restart)", head, task_id),
            _ => head,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_stable() {
        let task_id = Uuid::new_v4();
        assert_eq!(AgentEvent::TaskSubmitted { task_id }.name(), "task_submitted");
        assert_eq!(AgentEvent::TaskSucceeded { task_id }.name(), "task_succeeded");
        assert_eq!(AgentEvent::AutoRestarted { attempt: 1, max: 2 }.name(), "auto_restart");
    }

    #[test]
    fn describe_includes_transition_and_task() {
        let task_id = Uuid::new_v4();
        let line = AgentEvent::TaskFailed {
            task_id,
            error: "boom".to_string(),
        }
        .describe(AgentStatus::Running);

        assert!(line.starts_with("task_failed: running -> error"));
        assert!(line.contains(&task_id.to_string()));
        assert!(line.ends_with("boom"));
    }

    #[test]
    fn stop_event_reports_cancelled_task() {
        let task_id = Uuid::new_v4();
        let line = AgentEvent::Stopped {
            from: AgentStatus::Running,
            cancelled_task: Some(task_id),
        }
        .describe(AgentStatus::Running);

        assert!(line.contains("cancelled task"));
    }
}
