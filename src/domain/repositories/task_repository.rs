use async_trait::async_trait;
use uuid::Uuid;

use super::PersistenceResult;
use crate::domain::task::Task;

/// Repository trait for Task aggregate
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Save a task (insert or update)
    async fn save_task(&self, task: &Task) -> PersistenceResult<()>;

    /// Find a task by its id
    async fn load_task(&self, id: Uuid) -> PersistenceResult<Option<Task>>;

    /// Tasks newest first, optionally only those of one agent
    async fn list_tasks(&self, agent_id: Option<&str>) -> PersistenceResult<Vec<Task>>;
}
