use super::value_objects::TaskStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Task aggregate root
///
/// One prompt submitted to one agent, tracked to a terminal outcome.
///
/// # Invariants
/// - Prompt cannot be blank
/// - Status only moves forward (see [`TaskStatus::can_transition_to`])
/// - `started_at` is set when the task starts running, `completed_at` when
///   it reaches a terminal state
///
/// # Example
/// ```
/// use conclave_api::domain::task::{Task, TaskStatus};
///
/// let mut task = Task::new("coder".to_string(), "Write a test".to_string()).unwrap();
/// assert_eq!(task.status(), TaskStatus::Pending);
///
/// task.cancel().unwrap();
/// assert_eq!(task.status(), TaskStatus::Cancelled);
/// assert!(task.start().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    id: Uuid,
    agent_id: String,
    prompt: String,
    status: TaskStatus,
    result: Option<String>,
    error: Option<String>,
    session_id: Option<String>,
    cost_usd: Option<Decimal>,
    turns_used: Option<u32>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    workflow_id: Option<Uuid>,
    subtask_index: Option<u32>,
}

impl Task {
    /// Creates a new Pending task for an agent
    ///
    /// # Returns
    /// * `Ok(Task)` - New pending task
    /// * `Err(String)` - If the prompt is blank
    pub fn new(agent_id: String, prompt: String) -> Result<Self, String> {
        if prompt.trim().is_empty() {
            return Err("Prompt cannot be empty".to_string());
        }

        Ok(Self {
            id: Uuid::new_v4(),
            agent_id,
            prompt,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            session_id: None,
            cost_usd: None,
            turns_used: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            workflow_id: None,
            subtask_index: None,
        })
    }

    /// Links the task to a workflow step
    ///
    /// `subtask_index` is `None` for the planning and assembly steps.
    pub fn with_workflow(mut self, workflow_id: Uuid, subtask_index: Option<u32>) -> Self {
        self.workflow_id = Some(workflow_id);
        self.subtask_index = subtask_index;
        self
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "Cannot move task {} from {} to {}",
                self.id, self.status, next
            ));
        }
        self.status = next;
        Ok(())
    }

    /// Marks the task as handed to the model service (Pending -> Running)
    pub fn start(&mut self) -> Result<(), String> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Records a successful invocation (Running -> Completed)
    pub fn complete(
        &mut self,
        result: String,
        session_id: Option<String>,
        cost_usd: Option<Decimal>,
        turns_used: Option<u32>,
    ) -> Result<(), String> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        self.session_id = session_id;
        self.cost_usd = cost_usd;
        self.turns_used = turns_used;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Records a failure (Pending | Running -> Failed)
    pub fn fail(&mut self, error: String) -> Result<(), String> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Cancels the task (Pending | Running -> Cancelled)
    pub fn cancel(&mut self) -> Result<(), String> {
        self.transition(TaskStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    // ===== Getters =====

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn cost_usd(&self) -> Option<Decimal> {
        self.cost_usd
    }

    pub fn turns_used(&self) -> Option<u32> {
        self.turns_used
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn workflow_id(&self) -> Option<Uuid> {
        self.workflow_id
    }

    pub fn subtask_index(&self) -> Option<u32> {
        self.subtask_index
    }

    /// Whether the invocation continues the agent's previous session
    ///
    /// Workflow steps always start a fresh session so nothing carries over
    /// from earlier workflows or from direct use of the same agent.
    pub fn resumes_session(&self) -> bool {
        self.workflow_id.is_none()
    }

    /// Reconstructs a Task from persistence layer data
    ///
    /// Bypasses validation since the data was validated before it was stored.
    /// Only to be used by repository implementations.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persistence(
        id: Uuid,
        agent_id: String,
        prompt: String,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
        session_id: Option<String>,
        cost_usd: Option<Decimal>,
        turns_used: Option<u32>,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        workflow_id: Option<Uuid>,
        subtask_index: Option<u32>,
    ) -> Self {
        Self {
            id,
            agent_id,
            prompt,
            status,
            result,
            error,
            session_id,
            cost_usd,
            turns_used,
            created_at,
            started_at,
            completed_at,
            workflow_id,
            subtask_index,
        }
    }
}
