// Workflow progress events
//
// Emitted by the orchestrator on every workflow and subtask transition,
// in order, on the task driving the workflow.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::workflow::{SubtaskStatus, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum WorkflowProgress {
    Planning {
        workflow_id: Uuid,
    },
    Planned {
        workflow_id: Uuid,
        steps: usize,
    },
    SubtaskStarted {
        workflow_id: Uuid,
        index: u32,
        agent_id: String,
        task_id: Uuid,
    },
    SubtaskFinished {
        workflow_id: Uuid,
        index: u32,
        agent_id: String,
        status: SubtaskStatus,
    },
    Assembling {
        workflow_id: Uuid,
    },
    Finished {
        workflow_id: Uuid,
        status: WorkflowStatus,
    },
}

impl WorkflowProgress {
    pub fn workflow_id(&self) -> Uuid {
        match self {
            WorkflowProgress::Planning { workflow_id }
            | WorkflowProgress::Planned { workflow_id, .. }
            | WorkflowProgress::SubtaskStarted { workflow_id, .. }
            | WorkflowProgress::SubtaskFinished { workflow_id, .. }
            | WorkflowProgress::Assembling { workflow_id }
            | WorkflowProgress::Finished { workflow_id, .. } => *workflow_id,
        }
    }
}

/// Callback invoked synchronously for each progress event
pub type ProgressHook = Arc<dyn Fn(&WorkflowProgress) + Send + Sync>;
