//! In-memory implementation of the persistence adapter
//!
//! Same ordering guarantees as the SQLite store, used by tests and by
//! ephemeral runs that do not need durability.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::domain::agent::AgentRecord;
use crate::domain::log::LogLine;
use crate::domain::repositories::{
    AgentRepository, LogRepository, PersistenceResult, TaskRepository, WorkflowRepository,
};
use crate::domain::task::Task;
use crate::domain::workflow::{Subtask, Workflow};

#[derive(Default)]
struct Tables {
    agents: BTreeMap<String, AgentRecord>,
    // Insertion sequence breaks ties between equal timestamps
    tasks: HashMap<Uuid, (u64, Task)>,
    workflows: HashMap<Uuid, (u64, Workflow)>,
    subtasks: HashMap<Uuid, BTreeMap<u32, Subtask>>,
    logs: HashMap<String, Vec<LogLine>>,
    seq: u64,
}

impl Tables {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Map-backed store guarded by a single `parking_lot` lock
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryStore {
    async fn save_agent(&self, agent: &AgentRecord) -> PersistenceResult<()> {
        self.tables
            .write()
            .agents
            .insert(agent.id().to_string(), agent.clone());
        Ok(())
    }

    async fn load_agent(&self, id: &str) -> PersistenceResult<Option<AgentRecord>> {
        Ok(self.tables.read().agents.get(id).cloned())
    }

    async fn list_agents(&self) -> PersistenceResult<Vec<AgentRecord>> {
        Ok(self.tables.read().agents.values().cloned().collect())
    }

    async fn delete_agent(&self, id: &str) -> PersistenceResult<bool> {
        let mut tables = self.tables.write();
        tables.logs.remove(id);
        Ok(tables.agents.remove(id).is_some())
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn save_task(&self, task: &Task) -> PersistenceResult<()> {
        let mut tables = self.tables.write();
        let seq = match tables.tasks.get(&task.id()) {
            Some((seq, _)) => *seq,
            None => tables.next_seq(),
        };
        tables.tasks.insert(task.id(), (seq, task.clone()));
        Ok(())
    }

    async fn load_task(&self, id: Uuid) -> PersistenceResult<Option<Task>> {
        Ok(self.tables.read().tasks.get(&id).map(|(_, t)| t.clone()))
    }

    async fn list_tasks(&self, agent_id: Option<&str>) -> PersistenceResult<Vec<Task>> {
        let tables = self.tables.read();
        let mut tasks: Vec<&(u64, Task)> = tables
            .tasks
            .values()
            .filter(|(_, t)| agent_id.map_or(true, |a| t.agent_id() == a))
            .collect();
        tasks.sort_by(|(sa, a), (sb, b)| b.created_at().cmp(&a.created_at()).then(sb.cmp(sa)));
        Ok(tasks.into_iter().map(|(_, t)| t.clone()).collect())
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryStore {
    async fn save_workflow(&self, workflow: &Workflow) -> PersistenceResult<()> {
        let mut tables = self.tables.write();
        let seq = match tables.workflows.get(&workflow.id()) {
            Some((seq, _)) => *seq,
            None => tables.next_seq(),
        };
        tables
            .workflows
            .insert(workflow.id(), (seq, workflow.clone()));
        Ok(())
    }

    async fn load_workflow(&self, id: Uuid) -> PersistenceResult<Option<Workflow>> {
        Ok(self.tables.read().workflows.get(&id).map(|(_, w)| w.clone()))
    }

    async fn list_workflows(&self) -> PersistenceResult<Vec<Workflow>> {
        let tables = self.tables.read();
        let mut workflows: Vec<&(u64, Workflow)> = tables.workflows.values().collect();
        workflows.sort_by(|(sa, a), (sb, b)| b.created_at().cmp(&a.created_at()).then(sb.cmp(sa)));
        Ok(workflows.into_iter().map(|(_, w)| w.clone()).collect())
    }

    async fn save_subtask(&self, subtask: &Subtask) -> PersistenceResult<()> {
        self.tables
            .write()
            .subtasks
            .entry(subtask.workflow_id)
            .or_default()
            .insert(subtask.index, subtask.clone());
        Ok(())
    }

    async fn list_subtasks(&self, workflow_id: Uuid) -> PersistenceResult<Vec<Subtask>> {
        Ok(self
            .tables
            .read()
            .subtasks
            .get(&workflow_id)
            .map(|steps| steps.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl LogRepository for InMemoryStore {
    async fn append_log(&self, agent_id: &str, line: &LogLine) -> PersistenceResult<()> {
        self.tables
            .write()
            .logs
            .entry(agent_id.to_string())
            .or_default()
            .push(line.clone());
        Ok(())
    }

    async fn tail_log(&self, agent_id: &str, n: usize) -> PersistenceResult<Vec<LogLine>> {
        let tables = self.tables.read();
        let lines = match tables.logs.get(agent_id) {
            Some(lines) => lines,
            None => return Ok(Vec::new()),
        };
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].to_vec())
    }
}
