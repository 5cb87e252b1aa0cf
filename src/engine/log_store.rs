//! Per-agent append-only log
//!
//! Every line is written to the persistence adapter and mirrored to
//! `tracing` at the same level.

use std::sync::Arc;

use super::errors::EngineResult;
use crate::domain::log::{LogLevel, LogLine};
use crate::domain::repositories::Store;

#[derive(Clone)]
pub struct LogStore {
    store: Arc<dyn Store>,
}

impl LogStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Appends a line, surfacing storage failures to the caller
    pub async fn append(
        &self,
        agent_id: &str,
        level: LogLevel,
        message: impl Into<String>,
    ) -> EngineResult<()> {
        let line = LogLine::new(level, message);
        mirror(agent_id, &line);
        self.store.append_log(agent_id, &line).await?;
        Ok(())
    }

    /// Appends a line after the state change it describes is already durable
    ///
    /// Storage failures are reported through `tracing` only.
    pub async fn record(&self, agent_id: &str, level: LogLevel, message: impl Into<String>) {
        if let Err(e) = self.append(agent_id, level, message).await {
            tracing::error!(agent_id = %agent_id, error = %e, "Failed to append agent log line");
        }
    }

    /// The most recent `n` lines, oldest first
    pub async fn tail(&self, agent_id: &str, n: usize) -> EngineResult<Vec<LogLine>> {
        Ok(self.store.tail_log(agent_id, n).await?)
    }
}

fn mirror(agent_id: &str, line: &LogLine) {
    match line.level {
        LogLevel::Debug => tracing::debug!(agent_id = %agent_id, "{}", line.message),
        LogLevel::Info => tracing::info!(agent_id = %agent_id, "{}", line.message),
        LogLevel::Warn => tracing::warn!(agent_id = %agent_id, "{}", line.message),
        LogLevel::Error => tracing::error!(agent_id = %agent_id, "{}", line.message),
    }
}
