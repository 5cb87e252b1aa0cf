use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::agent::Capability;
use crate::domain::task::TaskStatus;

/// Lifecycle status of a workflow
///
/// # Status Transitions
/// ```text
/// Planning -> Running -> Assembling -> Completed
///     |          |            |
///     └----------┴------------┴-----> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Planner is decomposing the prompt
    Planning,
    /// Subtasks are executing in order
    Running,
    /// Planner is combining subtask results
    Assembling,
    /// Final result available
    Completed,
    /// Planning, a subtask or assembly failed, or the workflow was cancelled
    Failed,
}

impl WorkflowStatus {
    /// Checks if a transition from current status to next status is valid
    ///
    /// # Example
    /// ```
    /// use conclave_api::domain::workflow::value_objects::WorkflowStatus;
    ///
    /// assert!(WorkflowStatus::Planning.can_transition_to(WorkflowStatus::Running));
    /// assert!(!WorkflowStatus::Planning.can_transition_to(WorkflowStatus::Assembling));
    /// ```
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Planning, Running)
                | (Planning, Failed)
                | (Running, Assembling)
                | (Running, Failed)
                | (Assembling, Completed)
                | (Assembling, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Planning => write!(f, "planning"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Assembling => write!(f, "assembling"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of one planned step, mirroring its task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SubtaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubtaskStatus::Completed | SubtaskStatus::Failed | SubtaskStatus::Cancelled
        )
    }
}

impl From<TaskStatus> for SubtaskStatus {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending => SubtaskStatus::Pending,
            TaskStatus::Running => SubtaskStatus::Running,
            TaskStatus::Completed => SubtaskStatus::Completed,
            TaskStatus::Failed => SubtaskStatus::Failed,
            TaskStatus::Cancelled => SubtaskStatus::Cancelled,
        }
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubtaskStatus::Pending => write!(f, "pending"),
            SubtaskStatus::Running => write!(f, "running"),
            SubtaskStatus::Completed => write!(f, "completed"),
            SubtaskStatus::Failed => write!(f, "failed"),
            SubtaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Capability profile a planned step asks for
///
/// Decides the tools and system prompt of the worker agent that runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerProfile {
    Researcher,
    Coder,
    Reviewer,
    Tester,
    Writer,
}

impl WorkerProfile {
    pub const ALL: [WorkerProfile; 5] = [
        WorkerProfile::Researcher,
        WorkerProfile::Coder,
        WorkerProfile::Reviewer,
        WorkerProfile::Tester,
        WorkerProfile::Writer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerProfile::Researcher => "researcher",
            WorkerProfile::Coder => "coder",
            WorkerProfile::Reviewer => "reviewer",
            WorkerProfile::Tester => "tester",
            WorkerProfile::Writer => "writer",
        }
    }

    /// Tools granted to workers of this profile
    pub fn capabilities(&self) -> Vec<Capability> {
        use Capability::*;
        match self {
            WorkerProfile::Researcher => vec![Read, Glob, Grep, WebFetch, WebSearch],
            WorkerProfile::Coder => vec![Read, Write, Edit, Bash, Glob, Grep],
            WorkerProfile::Reviewer => vec![Read, Glob, Grep],
            WorkerProfile::Tester => vec![Read, Bash, Glob, Grep],
            WorkerProfile::Writer => vec![Read, Write, Edit, Glob],
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            WorkerProfile::Researcher => {
                "You are a research specialist. Gather facts from the codebase and the web, \
                 cite where each finding comes from, and report concisely."
            }
            WorkerProfile::Coder => {
                "You are an expert programmer. Read the existing code, make the requested \
                 changes, and run the relevant checks before reporting what you changed."
            }
            WorkerProfile::Reviewer => {
                "You are a senior code reviewer. Read the code and report bugs, style and \
                 security issues with file and line references. Do not modify files."
            }
            WorkerProfile::Tester => {
                "You are a test engineer. Run and extend the test suite, and report failures \
                 with the exact commands and output."
            }
            WorkerProfile::Writer => {
                "You are a technical writer. Produce clear, accurate documentation and prose \
                 for the requested audience."
            }
        }
    }
}

impl fmt::Display for WorkerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        WorkerProfile::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| format!("Unknown worker profile: '{}'", name))
    }
}

/// One step of a workflow plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    pub profile: WorkerProfile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_workflow_transitions() {
        assert!(WorkflowStatus::Planning.can_transition_to(WorkflowStatus::Running));
        assert!(WorkflowStatus::Running.can_transition_to(WorkflowStatus::Assembling));
        assert!(WorkflowStatus::Assembling.can_transition_to(WorkflowStatus::Completed));
    }

    #[test]
    fn every_active_workflow_state_can_fail() {
        assert!(WorkflowStatus::Planning.can_transition_to(WorkflowStatus::Failed));
        assert!(WorkflowStatus::Running.can_transition_to(WorkflowStatus::Failed));
        assert!(WorkflowStatus::Assembling.can_transition_to(WorkflowStatus::Failed));
    }

    #[test]
    fn invalid_transition_running_to_completed() {
        assert!(!WorkflowStatus::Running.can_transition_to(WorkflowStatus::Completed));
    }

    #[test]
    fn terminal_workflows_do_not_move() {
        assert!(!WorkflowStatus::Completed.can_transition_to(WorkflowStatus::Failed));
        assert!(!WorkflowStatus::Failed.can_transition_to(WorkflowStatus::Running));
    }

    #[test]
    fn subtask_status_mirrors_task_status() {
        assert_eq!(SubtaskStatus::from(TaskStatus::Completed), SubtaskStatus::Completed);
        assert_eq!(SubtaskStatus::from(TaskStatus::Cancelled), SubtaskStatus::Cancelled);
        assert!(SubtaskStatus::Failed.is_terminal());
        assert!(!SubtaskStatus::Running.is_terminal());
    }

    #[test]
    fn profile_parse_is_case_insensitive() {
        assert_eq!("Coder".parse::<WorkerProfile>().unwrap(), WorkerProfile::Coder);
        assert_eq!("REVIEWER".parse::<WorkerProfile>().unwrap(), WorkerProfile::Reviewer);
        assert!("wizard".parse::<WorkerProfile>().is_err());
    }

    #[test]
    fn reviewer_cannot_write() {
        let caps = WorkerProfile::Reviewer.capabilities();
        assert!(!caps.contains(&Capability::Write));
        assert!(!caps.contains(&Capability::Edit));
    }

    #[test]
    fn status_display() {
        assert_eq!(WorkflowStatus::Assembling.to_string(), "assembling");
        assert_eq!(SubtaskStatus::Cancelled.to_string(), "cancelled");
        assert_eq!(WorkerProfile::Tester.to_string(), "tester");
    }
}
