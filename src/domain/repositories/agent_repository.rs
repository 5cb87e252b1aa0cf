use async_trait::async_trait;

use super::PersistenceResult;
use crate::domain::agent::AgentRecord;

/// Repository trait for agents (configuration plus runtime state)
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Save an agent (insert or update)
    async fn save_agent(&self, agent: &AgentRecord) -> PersistenceResult<()>;

    /// Find an agent by its id
    async fn load_agent(&self, id: &str) -> PersistenceResult<Option<AgentRecord>>;

    /// All agents ordered by id
    async fn list_agents(&self) -> PersistenceResult<Vec<AgentRecord>>;

    /// Delete an agent, returning whether it existed
    async fn delete_agent(&self, id: &str) -> PersistenceResult<bool>;
}
