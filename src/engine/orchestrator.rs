//! Workflow orchestrator
//!
//! Drives a workflow through Planning, Running and Assembling. The planner
//! agent decomposes the prompt, one worker per step runs the subtasks
//! strictly in order, and the planner combines their results. Each workflow
//! runs on its own tokio task and never holds a lock while it waits.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use super::engine::EngineSettings;
use super::errors::{EngineError, EngineResult};
use super::events::{ProgressHook, WorkflowProgress};
use super::plan::{parse_plan, MAX_PLAN_STEPS};
use super::prompts;
use super::registry::AgentRegistry;
use super::scheduler::TaskScheduler;
use crate::domain::agent::agent::generate_agent_id;
use crate::domain::agent::{AgentConfig, AgentRecord, AgentSpec, Capability};
use crate::domain::repositories::Store;
use crate::domain::task::{Task, TaskStatus};
use crate::domain::workflow::{Subtask, WorkerProfile, Workflow};

const CANCEL_WAIT: Duration = Duration::from_secs(30);
const WORKFLOW_EVENT_CAPACITY: usize = 64;

/// A workflow together with its subtasks in index order
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub subtasks: Vec<Subtask>,
}

/// Why a workflow stopped early
struct Abort {
    error: EngineError,
    subtask: Option<u32>,
}

impl Abort {
    fn at(error: EngineError, index: u32) -> Self {
        Self {
            error,
            subtask: Some(index),
        }
    }
}

impl From<EngineError> for Abort {
    fn from(error: EngineError) -> Self {
        Self {
            error,
            subtask: None,
        }
    }
}

impl From<crate::domain::repositories::PersistenceError> for Abort {
    fn from(error: crate::domain::repositories::PersistenceError) -> Self {
        EngineError::from(error).into()
    }
}

pub struct WorkflowOrchestrator {
    scheduler: Arc<TaskScheduler>,
    registry: Arc<AgentRegistry>,
    store: Arc<dyn Store>,
    settings: EngineSettings,
    hooks: RwLock<Vec<ProgressHook>>,
    /// Drivers by workflow id; the handle is set once the driver is spawned
    running: Mutex<HashMap<Uuid, (CancellationToken, Option<JoinHandle<()>>)>>,
    finished: broadcast::Sender<Workflow>,
    closing: CancellationToken,
}

impl WorkflowOrchestrator {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        registry: Arc<AgentRegistry>,
        store: Arc<dyn Store>,
        settings: EngineSettings,
    ) -> Self {
        let (finished, _) = broadcast::channel(WORKFLOW_EVENT_CAPACITY);
        Self {
            scheduler,
            registry,
            store,
            settings,
            hooks: RwLock::new(Vec::new()),
            running: Mutex::new(HashMap::new()),
            finished,
            closing: CancellationToken::new(),
        }
    }

    /// Registers the planner agent if missing and makes sure it is started
    pub async fn ensure_planner(&self) -> EngineResult<AgentRecord> {
        let id = &self.settings.planner_id;

        if !self.registry.contains(id) {
            let mut spec = AgentSpec::new("Planner", prompts::PLANNER_SYSTEM_PROMPT);
            spec.id = Some(id.clone());
            spec.description = Some("Plans workflows and assembles their results".to_string());
            spec.capabilities = Some(
                [Capability::Read, Capability::Glob, Capability::Grep]
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect(),
            );
            spec.model = Some(self.settings.planner_model.clone());
            spec.max_turns = Some(200);
            spec.permission_mode = Some("plan".to_string());
            spec.cwd = self.settings.workdir.clone();
            spec.auto_restart = Some(true);
            spec.max_restarts = Some(3);

            let config = AgentConfig::from_spec(spec).map_err(EngineError::Validation)?;
            match self.registry.register(config).await {
                Ok(_) | Err(EngineError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.registry.start(id).await
    }

    /// Adds a callback fired on every workflow and subtask transition
    pub fn on_progress(&self, hook: ProgressHook) {
        self.hooks.write().push(hook);
    }

    /// Starts a workflow in the background and returns it in Planning
    #[instrument(skip(self, prompt))]
    pub async fn run_workflow(self: &Arc<Self>, prompt: &str) -> EngineResult<Workflow> {
        if self.closing.is_cancelled() {
            return Err(EngineError::Conflict("Engine is shutting down".to_string()));
        }

        let workflow = Workflow::new(prompt.to_string()).map_err(EngineError::Validation)?;
        let workflow_id = workflow.id();

        // Registered before the row is stored: a cancel that can load the
        // workflow always finds its token
        let token = self.closing.child_token();
        self.running
            .lock()
            .insert(workflow_id, (token.clone(), None));
        if let Err(e) = self.store.save_workflow(&workflow).await {
            self.running.lock().remove(&workflow_id);
            return Err(e.into());
        }

        {
            // Held across the spawn so the driver cannot deregister before its handle is set
            let mut running = self.running.lock();
            let handle = tokio::spawn(self.clone().drive(workflow.clone(), token));
            if let Some((_, slot)) = running.get_mut(&workflow_id) {
                *slot = Some(handle);
            }
        }

        tracing::info!(workflow_id = %workflow.id(), "Workflow started");
        Ok(workflow)
    }

    /// Runs a workflow and waits for it to finish
    ///
    /// On timeout the workflow keeps running; only the wait is abandoned.
    pub async fn run_workflow_sync(
        self: &Arc<Self>,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> EngineResult<WorkflowResult> {
        let finished = self.finished.subscribe();
        let workflow = self.run_workflow(prompt).await?;
        self.wait_on(finished, workflow.id(), timeout).await?;
        self.get(workflow.id()).await
    }

    pub async fn get(&self, workflow_id: Uuid) -> EngineResult<WorkflowResult> {
        let workflow = self.load(workflow_id).await?;
        let subtasks = self.store.list_subtasks(workflow_id).await?;
        Ok(WorkflowResult { workflow, subtasks })
    }

    pub async fn list(&self) -> EngineResult<Vec<Workflow>> {
        Ok(self.store.list_workflows().await?)
    }

    /// Waits for a workflow to reach Completed or Failed
    pub async fn wait_for_workflow(
        &self,
        workflow_id: Uuid,
        timeout: Option<Duration>,
    ) -> EngineResult<WorkflowResult> {
        let finished = self.finished.subscribe();
        self.wait_on(finished, workflow_id, timeout).await?;
        self.get(workflow_id).await
    }

    /// Cancels a workflow
    ///
    /// The active subtask's task is cancelled and steps that never started
    /// become Cancelled. Terminal workflows are returned unchanged.
    #[instrument(skip(self))]
    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> EngineResult<WorkflowResult> {
        let workflow = self.load(workflow_id).await?;
        if workflow.status().is_terminal() {
            return self.get(workflow_id).await;
        }

        let token = self
            .running
            .lock()
            .get(&workflow_id)
            .map(|(token, _)| token.clone());

        match token {
            Some(token) => {
                let finished = self.finished.subscribe();
                token.cancel();
                self.wait_on(finished, workflow_id, Some(CANCEL_WAIT)).await?;
            }
            None => {
                // No driver: either never driven by this process or it
                // finished after the load above
                let stored = self
                    .fail_workflow(workflow_id, "cancelled".to_string(), None)
                    .await?;
                let _ = self.finished.send(stored);
            }
        }

        let result = self.get(workflow_id).await?;
        tracing::info!(workflow_id = %workflow_id, status = %result.workflow.status(), "Workflow cancel handled");
        Ok(result)
    }

    /// Cancels every running workflow and waits for the drivers to unwind
    pub async fn shutdown(&self) {
        self.closing.cancel();
        let drivers: Vec<(Uuid, JoinHandle<()>)> = self
            .running
            .lock()
            .drain()
            .filter_map(|(id, (_, handle))| handle.map(|handle| (id, handle)))
            .collect();

        for (workflow_id, handle) in drivers {
            if let Err(e) = handle.await {
                tracing::error!(workflow_id = %workflow_id, error = %e, "Workflow driver panicked");
            }
        }
    }

    /// Marks a workflow failed and cancels the subtasks that never finished
    ///
    /// Works on the stored row: a workflow that is already Completed or
    /// Failed there is returned unchanged.
    pub async fn fail_workflow(
        &self,
        workflow_id: Uuid,
        reason: String,
        failed_subtask: Option<u32>,
    ) -> EngineResult<Workflow> {
        let mut workflow = self.load(workflow_id).await?;
        if workflow.status().is_terminal() {
            return Ok(workflow);
        }

        workflow
            .fail(reason, failed_subtask)
            .map_err(EngineError::Conflict)?;
        self.store.save_workflow(&workflow).await?;

        for mut subtask in self.store.list_subtasks(workflow_id).await? {
            if subtask.cancel() {
                self.store.save_subtask(&subtask).await?;
            }
        }
        Ok(workflow)
    }

    async fn load(&self, workflow_id: Uuid) -> EngineResult<Workflow> {
        self.store
            .load_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))
    }

    async fn wait_on(
        &self,
        mut finished: broadcast::Receiver<Workflow>,
        workflow_id: Uuid,
        timeout: Option<Duration>,
    ) -> EngineResult<Workflow> {
        let current = self.load(workflow_id).await?;
        if current.status().is_terminal() {
            return Ok(current);
        }

        let wait = async {
            loop {
                match finished.recv().await {
                    Ok(workflow) if workflow.id() == workflow_id => return Ok(workflow),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let workflow = self.load(workflow_id).await?;
                        if workflow.status().is_terminal() {
                            return Ok(workflow);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(EngineError::Conflict(
                            "Orchestrator shut down while waiting".to_string(),
                        ))
                    }
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                EngineError::Timeout(format!(
                    "Workflow {} did not finish within {:?}",
                    workflow_id, limit
                ))
            })?,
            None => wait.await,
        }
    }

    fn emit(&self, event: WorkflowProgress) {
        let hooks = self.hooks.read().clone();
        for hook in hooks {
            hook(&event);
        }
    }

    async fn drive(self: Arc<Self>, mut workflow: Workflow, token: CancellationToken) {
        let workflow_id = workflow.id();

        if let Err(abort) = self.execute(&mut workflow, &token).await {
            tracing::warn!(
                workflow_id = %workflow_id,
                failed_subtask = ?abort.subtask,
                error = %abort.error,
                "Workflow failed"
            );
            let reason = if token.is_cancelled() {
                "cancelled".to_string()
            } else {
                abort.error.to_string()
            };
            match self.fail_workflow(workflow_id, reason, abort.subtask).await {
                Ok(stored) => workflow = stored,
                Err(e) => {
                    tracing::error!(workflow_id = %workflow_id, error = %e, "Failed to record workflow failure")
                }
            }
        } else {
            tracing::info!(workflow_id = %workflow_id, "Workflow completed");
        }

        self.running.lock().remove(&workflow_id);
        self.emit(WorkflowProgress::Finished {
            workflow_id,
            status: workflow.status(),
        });
        let _ = self.finished.send(workflow);
    }

    #[instrument(skip_all, fields(workflow_id = %workflow.id()))]
    async fn execute(
        &self,
        workflow: &mut Workflow,
        token: &CancellationToken,
    ) -> Result<(), Abort> {
        let workflow_id = workflow.id();
        let planner = self.settings.planner_id.clone();

        // Planning
        self.emit(WorkflowProgress::Planning { workflow_id });
        let task = Task::new(
            planner.clone(),
            prompts::planning_prompt(workflow.prompt(), MAX_PLAN_STEPS),
        )
        .map_err(EngineError::Validation)?
        .with_workflow(workflow_id, None);
        let task = self.scheduler.submit_when_idle(task, token).await?;
        workflow.set_planner_task(task.id());
        self.store.save_workflow(workflow).await?;

        let task = self.await_task(task.id(), token).await?;
        let plan_text = outcome_text(&task, "Planning")?;
        let plan = parse_plan(&plan_text).map_err(EngineError::Planning)?;

        workflow
            .begin_running(plan.clone())
            .map_err(EngineError::Planning)?;
        self.store.save_workflow(workflow).await?;

        let mut subtasks: Vec<Subtask> = plan
            .iter()
            .enumerate()
            .map(|(index, step)| Subtask::new(workflow_id, index as u32, step))
            .collect();
        for subtask in &subtasks {
            self.store.save_subtask(subtask).await?;
        }
        tracing::info!(steps = subtasks.len(), "Plan accepted");
        self.emit(WorkflowProgress::Planned {
            workflow_id,
            steps: subtasks.len(),
        });

        // Running, one step at a time
        let total = subtasks.len();
        let mut results: Vec<(u32, String)> = Vec::with_capacity(total);
        for subtask in subtasks.iter_mut() {
            let index = subtask.index;
            if token.is_cancelled() {
                return Err(EngineError::Conflict("Workflow cancelled".to_string()).into());
            }

            let prompt = prompts::subtask_prompt(
                workflow.prompt(),
                index,
                total,
                &subtask.description,
                &results,
            );
            let task = self
                .dispatch_subtask(workflow_id, subtask, prompt)
                .await
                .map_err(|e| Abort::at(e, index))?;

            subtask
                .assign(task.agent_id().to_string(), task.id())
                .map_err(|e| Abort::at(EngineError::Conflict(e), index))?;
            self.store.save_subtask(subtask).await?;
            self.emit(WorkflowProgress::SubtaskStarted {
                workflow_id,
                index,
                agent_id: task.agent_id().to_string(),
                task_id: task.id(),
            });

            let task = self
                .await_task(task.id(), token)
                .await
                .map_err(|e| Abort::at(e, index))?;
            subtask
                .finish(
                    task.status().into(),
                    task.result().map(str::to_string),
                    task.error().map(str::to_string),
                )
                .map_err(|e| Abort::at(EngineError::Conflict(e), index))?;
            self.store.save_subtask(subtask).await?;
            self.emit(WorkflowProgress::SubtaskFinished {
                workflow_id,
                index,
                agent_id: task.agent_id().to_string(),
                status: subtask.status,
            });

            let text = outcome_text(&task, &format!("Subtask {}", index + 1))
                .map_err(|e| Abort::at(e, index))?;
            results.push((index, text));
        }

        // Assembling
        workflow
            .begin_assembling()
            .map_err(EngineError::Conflict)?;
        self.store.save_workflow(workflow).await?;
        self.emit(WorkflowProgress::Assembling { workflow_id });

        let task = Task::new(planner, prompts::assembly_prompt(workflow.prompt(), &results))
            .map_err(EngineError::Validation)?
            .with_workflow(workflow_id, None);
        let task = self.scheduler.submit_when_idle(task, token).await?;
        workflow.set_assembly_task(task.id());
        self.store.save_workflow(workflow).await?;

        let task = self.await_task(task.id(), token).await?;
        let text = outcome_text(&task, "Assembly")?;
        workflow.complete(text).map_err(EngineError::Invocation)?;
        self.store.save_workflow(workflow).await?;
        Ok(())
    }

    /// Waits for a task, cancelling it when the workflow is cancelled
    async fn await_task(&self, task_id: Uuid, token: &CancellationToken) -> EngineResult<Task> {
        tokio::select! {
            result = self.scheduler.wait(task_id, None) => result,
            _ = token.cancelled() => {
                tracing::info!(task_id = %task_id, "Cancelling workflow task");
                self.scheduler.cancel(task_id).await
            }
        }
    }

    /// Submits a subtask to an idle worker of its profile, creating one if needed
    async fn dispatch_subtask(
        &self,
        workflow_id: Uuid,
        subtask: &Subtask,
        prompt: String,
    ) -> EngineResult<Task> {
        let build = |agent_id: &str| {
            Task::new(agent_id.to_string(), prompt.clone())
                .map(|task| task.with_workflow(workflow_id, Some(subtask.index)))
                .map_err(EngineError::Validation)
        };

        let prefix = format!("worker-{}-", subtask.profile);
        for agent_id in self.registry.ids_with_prefix(&prefix) {
            match self.scheduler.submit_task(build(&agent_id)?).await {
                Ok(task) => return Ok(task),
                Err(EngineError::Conflict(_)) | Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        let agent_id = self.spawn_worker(subtask.profile).await?;
        self.scheduler.submit_task(build(&agent_id)?).await
    }

    async fn spawn_worker(&self, profile: WorkerProfile) -> EngineResult<String> {
        let mut spec = AgentSpec::new(format!("{} worker", profile), profile.system_prompt());
        spec.id = Some(format!("worker-{}-{}", profile, generate_agent_id()));
        spec.description = Some(format!("Ephemeral {} created by a workflow", profile));
        spec.capabilities = Some(
            profile
                .capabilities()
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
        );
        spec.model = Some(self.settings.worker_model.clone());
        spec.cwd = self.settings.workdir.clone();
        spec.auto_restart = Some(false);

        let config = AgentConfig::from_spec(spec).map_err(EngineError::Validation)?;
        let record = self.registry.register(config).await?;
        self.registry.start(record.id()).await?;
        tracing::info!(agent_id = %record.id(), profile = %profile, "Worker created");
        Ok(record.config.id)
    }
}

/// Result text of a finished workflow task, or why there is none
fn outcome_text(task: &Task, stage: &str) -> EngineResult<String> {
    match task.status() {
        TaskStatus::Completed => match task.result() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(EngineError::Invocation(format!(
                "{} returned an empty result",
                stage
            ))),
        },
        TaskStatus::Cancelled => Err(EngineError::Conflict(format!("{} was cancelled", stage))),
        status => Err(EngineError::Invocation(format!(
            "{} {}: {}",
            stage,
            status,
            task.error().unwrap_or("no error recorded")
        ))),
    }
}
