use async_trait::async_trait;
use uuid::Uuid;

use super::PersistenceResult;
use crate::domain::workflow::{Subtask, Workflow};

/// Repository trait for Workflow aggregate and its owned subtasks
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Save a workflow (insert or update)
    async fn save_workflow(&self, workflow: &Workflow) -> PersistenceResult<()>;

    /// Find a workflow by its id
    async fn load_workflow(&self, id: Uuid) -> PersistenceResult<Option<Workflow>>;

    /// All workflows newest first
    async fn list_workflows(&self) -> PersistenceResult<Vec<Workflow>>;

    /// Save a subtask (insert or update), keyed by workflow id and index
    async fn save_subtask(&self, subtask: &Subtask) -> PersistenceResult<()>;

    /// Subtasks of a workflow in index order
    async fn list_subtasks(&self, workflow_id: Uuid) -> PersistenceResult<Vec<Subtask>>;
}
