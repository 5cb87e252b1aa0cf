use async_trait::async_trait;

use super::PersistenceResult;
use crate::domain::log::LogLine;

/// Append-only per-agent log storage
#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn append_log(&self, agent_id: &str, line: &LogLine) -> PersistenceResult<()>;

    /// The most recent `n` lines, oldest first
    async fn tail_log(&self, agent_id: &str, n: usize) -> PersistenceResult<Vec<LogLine>>;
}
