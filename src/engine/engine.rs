//! Engine facade
//!
//! The one entry point presentation layers talk to. Owns the registry, the
//! scheduler with its dispatch loop, the orchestrator and the log store, and
//! defines their lifecycle: [`Engine::init`] rehydrates from the store and
//! spawns the dispatch loop, [`Engine::shutdown`] unwinds everything in
//! flight.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::errors::{EngineError, EngineResult};
use super::events::ProgressHook;
use super::invoker::ModelInvoker;
use super::log_store::LogStore;
use super::orchestrator::{WorkflowOrchestrator, WorkflowResult};
use super::presets::preset_specs;
use super::registry::AgentRegistry;
use super::scheduler::TaskScheduler;
use crate::domain::agent::{AgentConfig, AgentRecord, AgentSpec, AgentStatus};
use crate::domain::log::{LogLevel, LogLine};
use crate::domain::repositories::Store;
use crate::domain::task::Task;
use crate::domain::workflow::Workflow;

const RESTART_REASON: &str = "interrupted by engine restart";

/// Tunables of the engine itself
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub planner_id: String,
    pub planner_model: String,
    pub worker_model: String,
    /// Working directory of the planner and of workers created by workflows
    pub workdir: Option<String>,
    /// Bound of the dispatch command channel
    pub dispatch_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            planner_id: "planner".to_string(),
            planner_model: "opus".to_string(),
            worker_model: "sonnet".to_string(),
            workdir: None,
            dispatch_capacity: 64,
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: Arc<AgentRegistry>,
    scheduler: Arc<TaskScheduler>,
    orchestrator: Arc<WorkflowOrchestrator>,
    logs: LogStore,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Rehydrates state from the store and starts the dispatch loop
    ///
    /// Work that was in flight when the previous process went away cannot be
    /// resumed: Running agents go to Error, unfinished tasks fail and
    /// unfinished workflows fail with their open subtasks cancelled.
    pub async fn init(
        store: Arc<dyn Store>,
        invoker: Arc<dyn ModelInvoker>,
        settings: EngineSettings,
    ) -> EngineResult<Self> {
        let logs = LogStore::new(store.clone());
        let registry = Arc::new(AgentRegistry::new(store.clone(), logs.clone()));

        let agents = store.list_agents().await?;
        let agent_count = agents.len();
        for mut record in agents {
            if let Some(event) = record.state.interrupt() {
                store.save_agent(&record).await?;
                logs.record(record.id(), LogLevel::Error, event.describe(AgentStatus::Running))
                    .await;
            }
            registry.insert(record);
        }

        let mut interrupted = 0usize;
        for mut task in store.list_tasks(None).await? {
            if !task.is_terminal() {
                task.fail(RESTART_REASON.to_string())
                    .map_err(EngineError::Conflict)?;
                store.save_task(&task).await?;
                interrupted += 1;
            }
        }

        let (scheduler, dispatch) = TaskScheduler::new(
            registry.clone(),
            store.clone(),
            logs.clone(),
            invoker,
            settings.dispatch_capacity,
        );
        let orchestrator = Arc::new(WorkflowOrchestrator::new(
            scheduler.clone(),
            registry.clone(),
            store.clone(),
            settings,
        ));

        for workflow in store.list_workflows().await? {
            if !workflow.status().is_terminal() {
                orchestrator
                    .fail_workflow(workflow.id(), RESTART_REASON.to_string(), None)
                    .await?;
                interrupted += 1;
            }
        }

        orchestrator.ensure_planner().await?;
        let handle = tokio::spawn(dispatch.run());

        tracing::info!(
            agents = agent_count,
            interrupted = interrupted,
            "Engine initialized"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                registry,
                scheduler,
                orchestrator,
                logs,
                dispatch: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Cancels running workflows and in-flight invocations, then stops the
    /// dispatch loop. Safe to call more than once.
    pub async fn shutdown(&self) {
        tracing::info!("Engine shutting down");
        self.inner.orchestrator.shutdown().await;
        self.inner.scheduler.shutdown().await;

        if let Some(handle) = self.inner.dispatch.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Dispatch loop panicked");
            }
        }
        tracing::info!("Engine stopped");
    }

    // ===== Agents =====

    pub async fn create_agent(&self, spec: AgentSpec) -> EngineResult<AgentRecord> {
        let config = AgentConfig::from_spec(spec).map_err(EngineError::Validation)?;
        self.inner.registry.register(config).await
    }

    /// Registers the preset agents that do not exist yet, returning them
    ///
    /// Presets are left Stopped like any new agent. Existing agents with a
    /// preset id are not touched.
    pub async fn seed_presets(&self) -> EngineResult<Vec<AgentRecord>> {
        let mut created = Vec::new();
        for spec in preset_specs() {
            let config = AgentConfig::from_spec(spec).map_err(EngineError::Validation)?;
            if self.inner.registry.contains(&config.id) {
                continue;
            }
            match self.inner.registry.register(config).await {
                Ok(record) => created.push(record),
                Err(EngineError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::info!(created = created.len(), "Preset agents seeded");
        Ok(created)
    }

    pub async fn list_agents(&self) -> Vec<AgentRecord> {
        self.inner.registry.list().await
    }

    pub async fn get_agent(&self, agent_id: &str) -> EngineResult<AgentRecord> {
        self.inner.registry.snapshot(agent_id).await
    }

    pub async fn delete_agent(&self, agent_id: &str) -> EngineResult<()> {
        self.inner.registry.remove(agent_id).await
    }

    pub async fn start_agent(&self, agent_id: &str) -> EngineResult<AgentRecord> {
        self.inner.registry.start(agent_id).await
    }

    pub async fn stop_agent(&self, agent_id: &str) -> EngineResult<AgentRecord> {
        self.inner.scheduler.stop_agent(agent_id).await
    }

    pub async fn tail_logs(&self, agent_id: &str, lines: usize) -> EngineResult<Vec<LogLine>> {
        self.inner.registry.get(agent_id)?;
        self.inner.logs.tail(agent_id, lines).await
    }

    // ===== Tasks =====

    pub async fn submit_task(&self, agent_id: &str, prompt: &str) -> EngineResult<Task> {
        self.inner.scheduler.submit(agent_id, prompt).await
    }

    pub async fn task_status(&self, task_id: Uuid) -> EngineResult<Task> {
        self.inner.scheduler.status(task_id).await
    }

    pub async fn list_tasks(&self, agent_id: Option<&str>) -> EngineResult<Vec<Task>> {
        self.inner.scheduler.list(agent_id).await
    }

    pub async fn cancel_task(&self, task_id: Uuid) -> EngineResult<Task> {
        self.inner.scheduler.cancel(task_id).await
    }

    pub async fn wait_for_task(
        &self,
        task_id: Uuid,
        timeout: Option<Duration>,
    ) -> EngineResult<Task> {
        self.inner.scheduler.wait(task_id, timeout).await
    }

    // ===== Workflows =====

    pub async fn run_workflow(&self, prompt: &str) -> EngineResult<Workflow> {
        self.inner.orchestrator.run_workflow(prompt).await
    }

    pub async fn run_workflow_sync(
        &self,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> EngineResult<WorkflowResult> {
        self.inner
            .orchestrator
            .run_workflow_sync(prompt, timeout)
            .await
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> EngineResult<WorkflowResult> {
        self.inner.orchestrator.get(workflow_id).await
    }

    pub async fn list_workflows(&self) -> EngineResult<Vec<Workflow>> {
        self.inner.orchestrator.list().await
    }

    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> EngineResult<WorkflowResult> {
        self.inner.orchestrator.cancel_workflow(workflow_id).await
    }

    pub async fn wait_for_workflow(
        &self,
        workflow_id: Uuid,
        timeout: Option<Duration>,
    ) -> EngineResult<WorkflowResult> {
        self.inner
            .orchestrator
            .wait_for_workflow(workflow_id, timeout)
            .await
    }

    /// Registers a callback fired synchronously on every workflow transition
    pub fn on_progress(&self, hook: ProgressHook) {
        self.inner.orchestrator.on_progress(hook);
    }
}
