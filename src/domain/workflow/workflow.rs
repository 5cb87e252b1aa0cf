use super::value_objects::{PlanStep, SubtaskStatus, WorkerProfile, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Workflow aggregate root
///
/// A multi-step orchestration that decomposes one high-level prompt into
/// ordered subtasks and assembles their outcomes.
///
/// # Invariants
/// - Prompt cannot be blank
/// - A workflow only enters Running with a non-empty plan
/// - A Completed workflow has a non-empty result
/// - Status transitions follow [`WorkflowStatus::can_transition_to`]
///
/// # Example
/// ```
/// use conclave_api::domain::workflow::{Workflow, WorkflowStatus};
///
/// let mut workflow = Workflow::new("Build X".to_string()).unwrap();
/// assert_eq!(workflow.status(), WorkflowStatus::Planning);
///
/// assert!(workflow.begin_running(vec![]).is_err());
/// workflow.fail("planner returned no steps".to_string(), None).unwrap();
/// assert!(workflow.status().is_terminal());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workflow {
    id: Uuid,
    prompt: String,
    status: WorkflowStatus,
    plan: Vec<PlanStep>,
    result: Option<String>,
    error: Option<String>,
    failed_subtask: Option<u32>,
    planner_task_id: Option<Uuid>,
    assembly_task_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Creates a new workflow in Planning
    pub fn new(prompt: String) -> Result<Self, String> {
        if prompt.trim().is_empty() {
            return Err("Workflow prompt cannot be empty".to_string());
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            prompt,
            status: WorkflowStatus::Planning,
            plan: Vec::new(),
            result: None,
            error: None,
            failed_subtask: None,
            planner_task_id: None,
            assembly_task_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    fn transition(&mut self, next: WorkflowStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "Cannot move workflow {} from {} to {}",
                self.id, self.status, next
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_planner_task(&mut self, task_id: Uuid) {
        self.planner_task_id = Some(task_id);
        self.updated_at = Utc::now();
    }

    pub fn set_assembly_task(&mut self, task_id: Uuid) {
        self.assembly_task_id = Some(task_id);
        self.updated_at = Utc::now();
    }

    /// Accepts the plan and starts executing it (Planning -> Running)
    pub fn begin_running(&mut self, plan: Vec<PlanStep>) -> Result<(), String> {
        if plan.is_empty() {
            return Err("Plan must contain at least one step".to_string());
        }
        self.transition(WorkflowStatus::Running)?;
        self.plan = plan;
        Ok(())
    }

    /// All subtasks completed (Running -> Assembling)
    pub fn begin_assembling(&mut self) -> Result<(), String> {
        self.transition(WorkflowStatus::Assembling)
    }

    /// Stores the assembled result (Assembling -> Completed)
    pub fn complete(&mut self, result: String) -> Result<(), String> {
        if result.trim().is_empty() {
            return Err("Assembled result cannot be empty".to_string());
        }
        self.transition(WorkflowStatus::Completed)?;
        self.result = Some(result);
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// Marks the workflow failed, optionally naming the failed subtask
    pub fn fail(&mut self, reason: String, failed_subtask: Option<u32>) -> Result<(), String> {
        self.transition(WorkflowStatus::Failed)?;
        self.error = Some(reason);
        self.failed_subtask = failed_subtask;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    // ===== Getters =====

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn plan(&self) -> &[PlanStep] {
        &self.plan
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn failed_subtask(&self) -> Option<u32> {
        self.failed_subtask
    }

    pub fn planner_task_id(&self) -> Option<Uuid> {
        self.planner_task_id
    }

    pub fn assembly_task_id(&self) -> Option<Uuid> {
        self.assembly_task_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Reconstructs a Workflow from persistence layer data
    ///
    /// Only to be used by repository implementations.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persistence(
        id: Uuid,
        prompt: String,
        status: WorkflowStatus,
        plan: Vec<PlanStep>,
        result: Option<String>,
        error: Option<String>,
        failed_subtask: Option<u32>,
        planner_task_id: Option<Uuid>,
        assembly_task_id: Option<Uuid>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            prompt,
            status,
            plan,
            result,
            error,
            failed_subtask,
            planner_task_id,
            assembly_task_id,
            created_at,
            updated_at,
            completed_at,
        }
    }
}

/// One planned step of a workflow, backed by at most one task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subtask {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub index: u32,
    pub description: String,
    pub profile: WorkerProfile,
    pub agent_id: Option<String>,
    pub task_id: Option<Uuid>,
    pub status: SubtaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Subtask {
    pub fn new(workflow_id: Uuid, index: u32, step: &PlanStep) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            index,
            description: step.description.clone(),
            profile: step.profile,
            agent_id: None,
            task_id: None,
            status: SubtaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// Binds the subtask to the agent and task running it
    pub fn assign(&mut self, agent_id: String, task_id: Uuid) -> Result<(), String> {
        if self.status != SubtaskStatus::Pending {
            return Err(format!(
                "Subtask {} is already {}",
                self.index, self.status
            ));
        }
        self.agent_id = Some(agent_id);
        self.task_id = Some(task_id);
        self.status = SubtaskStatus::Running;
        Ok(())
    }

    /// Mirrors the terminal state of the backing task
    pub fn finish(
        &mut self,
        status: SubtaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), String> {
        if !status.is_terminal() {
            return Err(format!("{} is not a terminal subtask status", status));
        }
        if self.status.is_terminal() {
            return Err(format!(
                "Subtask {} already finished as {}",
                self.index, self.status
            ));
        }
        self.status = status;
        self.result = result;
        self.error = error;
        Ok(())
    }

    /// Cancels a subtask that never finished; terminal subtasks are left alone
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = SubtaskStatus::Cancelled;
        true
    }
}
