//! Agent registry
//!
//! In-memory map of agent id to configuration plus runtime state. Each agent
//! sits in its own [`AgentSlot`] behind its own async mutex, so operations on
//! one agent never wait for another agent. The map itself is only locked for
//! lookups and inserts, never across an await point.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, Notify};
use uuid::Uuid;

use super::errors::{EngineError, EngineResult};
use super::log_store::LogStore;
use crate::domain::agent::{AgentConfig, AgentEvent, AgentRecord, AgentRuntimeState, AgentStatus};
use crate::domain::log::LogLevel;
use crate::domain::repositories::Store;
use crate::domain::task::Task;

/// Mutable part of an agent guarded by the slot lock
#[derive(Debug)]
pub struct AgentEntry {
    pub state: AgentRuntimeState,
    /// Task bound to the agent, Pending until dispatched then Running
    pub active: Option<Task>,
    removed: bool,
}

impl AgentEntry {
    /// The bound task if it is the one asked for
    pub fn active_task(&self, task_id: Uuid) -> Option<&Task> {
        self.active.as_ref().filter(|task| task.id() == task_id)
    }
}

/// One registered agent
pub struct AgentSlot {
    config: Arc<AgentConfig>,
    entry: Mutex<AgentEntry>,
    idle: Notify,
}

impl AgentSlot {
    fn new(config: AgentConfig, state: AgentRuntimeState) -> Self {
        Self {
            config: Arc::new(config),
            entry: Mutex::new(AgentEntry {
                state,
                active: None,
                removed: false,
            }),
            idle: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }

    /// Locks this agent's state; fails if the agent was removed meanwhile
    pub async fn lock(&self) -> EngineResult<MutexGuard<'_, AgentEntry>> {
        let entry = self.entry.lock().await;
        if entry.removed {
            return Err(EngineError::agent_not_found(self.id()));
        }
        Ok(entry)
    }

    /// Resolves on the next transition to Idle
    pub fn idle(&self) -> &Notify {
        &self.idle
    }

    fn record(&self, state: &AgentRuntimeState) -> AgentRecord {
        AgentRecord {
            config: (*self.config).clone(),
            state: state.clone(),
        }
    }
}

pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentSlot>>>,
    store: Arc<dyn Store>,
    logs: LogStore,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn Store>, logs: LogStore) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            store,
            logs,
        }
    }

    /// Inserts an already persisted record (used when rehydrating)
    pub fn insert(&self, record: AgentRecord) {
        let slot = Arc::new(AgentSlot::new(record.config, record.state));
        self.agents.write().insert(slot.id().to_string(), slot);
    }

    /// Registers a new agent in the Stopped state
    ///
    /// # Errors
    /// * `Conflict` - An agent with the same id exists
    /// * `Persistence` - The record could not be stored
    pub async fn register(&self, config: AgentConfig) -> EngineResult<AgentRecord> {
        let id = config.id.clone();
        let slot = Arc::new(AgentSlot::new(config, AgentRuntimeState::default()));

        {
            let mut agents = self.agents.write();
            if agents.contains_key(&id) {
                return Err(EngineError::Conflict(format!(
                    "Agent '{}' already exists",
                    id
                )));
            }
            agents.insert(id.clone(), slot.clone());
        }

        let record = {
            let entry = slot.entry.lock().await;
            slot.record(&entry.state)
        };
        if let Err(e) = self.store.save_agent(&record).await {
            self.agents.write().remove(&id);
            return Err(e.into());
        }

        self.logs
            .record(&id, LogLevel::Info, format!("registered (model {})", record.config.model))
            .await;
        tracing::info!(agent_id = %id, "Agent registered");
        Ok(record)
    }

    pub fn get(&self, id: &str) -> EngineResult<Arc<AgentSlot>> {
        self.agents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::agent_not_found(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.read().contains_key(id)
    }

    /// Current configuration and state of one agent
    pub async fn snapshot(&self, id: &str) -> EngineResult<AgentRecord> {
        let slot = self.get(id)?;
        let entry = slot.lock().await?;
        Ok(slot.record(&entry.state))
    }

    /// All agents ordered by id
    pub async fn list(&self) -> Vec<AgentRecord> {
        let mut slots: Vec<Arc<AgentSlot>> = self.agents.read().values().cloned().collect();
        slots.sort_by(|a, b| a.id().cmp(b.id()));

        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Ok(entry) = slot.lock().await {
                records.push(slot.record(&entry.state));
            }
        }
        records
    }

    /// Removes an agent that is not running
    ///
    /// # Errors
    /// * `NotFound` - Unknown agent
    /// * `Conflict` - The agent has a task in flight
    pub async fn remove(&self, id: &str) -> EngineResult<()> {
        let slot = self.get(id)?;
        let mut entry = slot.lock().await?;

        if entry.state.status == AgentStatus::Running {
            return Err(EngineError::Conflict(format!(
                "Agent '{}' is running a task and cannot be deleted",
                id
            )));
        }

        self.store.delete_agent(id).await?;
        entry.removed = true;
        self.agents.write().remove(id);
        drop(entry);

        // Wake anyone queued on this agent so they observe the removal
        slot.idle.notify_waiters();
        tracing::info!(agent_id = %id, "Agent deleted");
        Ok(())
    }

    /// Brings an agent to Idle; a no-op for Idle or Running agents
    pub async fn start(&self, id: &str) -> EngineResult<AgentRecord> {
        let slot = self.get(id)?;
        let mut entry = slot.lock().await?;

        let mut next = entry.state.clone();
        if let Some(event) = next.start() {
            self.commit(&slot, &mut entry, next, &event).await?;
        }
        Ok(slot.record(&entry.state))
    }

    /// Stops an agent, cancelling the task bound to it
    ///
    /// Returns the stopped record and the task that was cancelled, if any.
    /// Stopping a Stopped agent is a no-op.
    pub async fn stop(&self, id: &str) -> EngineResult<(AgentRecord, Option<Task>)> {
        let slot = self.get(id)?;
        let mut entry = slot.lock().await?;

        let mut next = entry.state.clone();
        let Some(event) = next.stop() else {
            return Ok((slot.record(&entry.state), None));
        };

        let mut cancelled = None;
        if let Some(mut task) = entry.active.clone() {
            if !task.is_terminal() {
                task.cancel().map_err(EngineError::Conflict)?;
                self.store.save_task(&task).await?;
                self.logs
                    .record(id, LogLevel::Warn, format!("task {} cancelled by stop", task.id()))
                    .await;
                cancelled = Some(task);
            }
        }

        self.commit(&slot, &mut entry, next, &event).await?;
        entry.active = None;
        Ok((slot.record(&entry.state), cancelled))
    }

    /// Persists a new runtime state, then makes it current and logs the event
    ///
    /// The in-memory state only changes once the store accepted the write.
    pub async fn commit(
        &self,
        slot: &AgentSlot,
        entry: &mut AgentEntry,
        next: AgentRuntimeState,
        event: &AgentEvent,
    ) -> EngineResult<()> {
        let from = entry.state.status;
        self.store.save_agent(&slot.record(&next)).await?;
        entry.state = next;

        let level = match event {
            AgentEvent::TaskFailed { .. } | AgentEvent::Interrupted { .. } => LogLevel::Error,
            AgentEvent::Stopped {
                cancelled_task: Some(_),
                ..
            } => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        self.logs.record(slot.id(), level, event.describe(from)).await;

        if entry.state.status == AgentStatus::Idle {
            slot.idle.notify_waiters();
        }
        Ok(())
    }

    /// Ids of registered agents whose id starts with `prefix`, sorted
    pub fn ids_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .read()
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
