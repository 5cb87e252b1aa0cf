// Repository traits (ports) for the persistence adapter
// Implementations live in the infrastructure layer

pub mod agent_repository;
pub mod log_repository;
pub mod task_repository;
pub mod workflow_repository;

pub use agent_repository::AgentRepository;
pub use log_repository::LogRepository;
pub use task_repository::TaskRepository;
pub use workflow_repository::WorkflowRepository;

use thiserror::Error;

/// Failure of the durable storage after its own retry policy is exhausted
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Full persistence surface consumed by the engine
///
/// Blanket-implemented for anything that implements every repository.
pub trait Store: AgentRepository + TaskRepository + WorkflowRepository + LogRepository {}

impl<T> Store for T where T: AgentRepository + TaskRepository + WorkflowRepository + LogRepository {}
