//! Task scheduler
//!
//! Submissions are validated and persisted on the caller's task, then handed
//! to a single [`DispatchLoop`] through a bounded command channel. The loop
//! owns every in-flight invocation: invocations for different agents run
//! concurrently, while the agent status (one bound task at a time) keeps
//! invocations for the same agent strictly serialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use super::errors::{EngineError, EngineResult};
use super::invoker::{InvocationError, InvocationOutput, InvocationRequest, ModelInvoker};
use super::log_store::LogStore;
use super::registry::{AgentRegistry, AgentSlot};
use crate::domain::agent::{AgentRecord, AgentStatus};
use crate::domain::log::LogLevel;
use crate::domain::repositories::Store;
use crate::domain::task::{Task, TaskStatus};

const TASK_EVENT_CAPACITY: usize = 256;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Messages accepted by the dispatch loop
#[derive(Debug)]
pub enum Command {
    /// Invoke the model for a task already bound to its agent
    Submit { agent_id: String, task_id: Uuid },
    /// Stop the invocation of one task
    Cancel { task_id: Uuid },
    /// Cancel everything in flight and exit once it unwound
    Shutdown,
}

pub struct TaskScheduler {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn Store>,
    logs: LogStore,
    invoker: Arc<dyn ModelInvoker>,
    commands: mpsc::Sender<Command>,
    updates: broadcast::Sender<Task>,
    closing: CancellationToken,
}

impl TaskScheduler {
    /// Creates the scheduler and the loop that must be spawned to drive it
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn Store>,
        logs: LogStore,
        invoker: Arc<dyn ModelInvoker>,
        capacity: usize,
    ) -> (Arc<Self>, DispatchLoop) {
        let (commands, receiver) = mpsc::channel(capacity.max(1));
        let (updates, _) = broadcast::channel(TASK_EVENT_CAPACITY);

        let scheduler = Arc::new(Self {
            registry,
            store,
            logs,
            invoker,
            commands,
            updates,
            closing: CancellationToken::new(),
        });
        let dispatch = DispatchLoop {
            scheduler: scheduler.clone(),
            receiver,
            jobs: JoinSet::new(),
            in_flight: HashMap::new(),
        };
        (scheduler, dispatch)
    }

    /// Submits a prompt to an Idle agent
    ///
    /// # Errors
    /// * `Validation` - Blank prompt
    /// * `NotFound` - Unknown agent
    /// * `Conflict` - The agent is not Idle, or the engine is shutting down
    pub async fn submit(&self, agent_id: &str, prompt: &str) -> EngineResult<Task> {
        let task =
            Task::new(agent_id.to_string(), prompt.to_string()).map_err(EngineError::Validation)?;
        self.submit_task(task).await
    }

    /// Binds a prepared Pending task to its agent and queues the invocation
    #[instrument(skip(self, task), fields(agent_id = %task.agent_id(), task_id = %task.id()))]
    pub async fn submit_task(&self, task: Task) -> EngineResult<Task> {
        let agent_id = task.agent_id().to_string();
        let task_id = task.id();
        if self.closing.is_cancelled() {
            return Err(EngineError::Conflict("Engine is shutting down".to_string()));
        }
        let slot = self.registry.get(&agent_id)?;

        {
            let mut entry = slot.lock().await?;
            if entry.state.status != AgentStatus::Idle {
                return Err(EngineError::Conflict(format!(
                    "Agent '{}' is {} and accepts one task at a time",
                    agent_id, entry.state.status
                )));
            }

            let mut next = entry.state.clone();
            let event = next.begin_task(task_id).map_err(EngineError::Conflict)?;

            self.store.save_task(&task).await?;
            if let Err(e) = self.registry.commit(&slot, &mut entry, next, &event).await {
                let mut orphan = task.clone();
                if orphan.fail(format!("Agent state could not be stored: {}", e)).is_ok() {
                    let _ = self.store.save_task(&orphan).await;
                }
                return Err(e);
            }
            entry.active = Some(task.clone());
        }

        tracing::info!("Task submitted");
        if self
            .commands
            .send(Command::Submit {
                agent_id: agent_id.clone(),
                task_id,
            })
            .await
            .is_err()
        {
            tracing::error!("Dispatch loop is not running");
            let failure: Result<InvocationOutput, InvocationError> = Err(
                InvocationError::Unavailable("scheduler is not running".to_string()),
            );
            self.finish(&slot, task_id, Some(failure)).await?;
            return self.status(task_id).await;
        }

        Ok(task)
    }

    /// Submits a task, waiting for the agent to become Idle while it is busy
    ///
    /// Used for agents shared between callers (the planner). Fails with
    /// `Conflict` as soon as the agent is Stopped or in Error, or when
    /// `cancel` fires while waiting. Submission itself is never interrupted.
    pub async fn submit_when_idle(
        &self,
        task: Task,
        cancel: &CancellationToken,
    ) -> EngineResult<Task> {
        let slot = self.registry.get(task.agent_id())?;
        loop {
            let notified = slot.idle().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return Err(EngineError::Conflict("Submission cancelled".to_string()));
            }

            match self.submit_task(task.clone()).await {
                Err(EngineError::Conflict(reason)) => {
                    let status = slot.lock().await?.state.status;
                    if matches!(status, AgentStatus::Stopped | AgentStatus::Error) {
                        return Err(EngineError::Conflict(reason));
                    }
                    tracing::debug!(agent_id = %slot.id(), "Agent busy, waiting for it to become idle");
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                other => return other,
            }
        }
    }

    pub async fn status(&self, task_id: Uuid) -> EngineResult<Task> {
        self.store
            .load_task(task_id)
            .await?
            .ok_or_else(|| EngineError::task_not_found(task_id))
    }

    pub async fn list(&self, agent_id: Option<&str>) -> EngineResult<Vec<Task>> {
        Ok(self.store.list_tasks(agent_id).await?)
    }

    /// Cancels a task
    ///
    /// A Pending task becomes Cancelled right away and its agent Idle. A
    /// Running task becomes Cancelled and its invocation is asked to stop;
    /// the agent returns to Idle once the invocation unwound. Terminal tasks
    /// are returned unchanged.
    #[instrument(skip(self))]
    pub async fn cancel(&self, task_id: Uuid) -> EngineResult<Task> {
        let task = self.status(task_id).await?;
        if task.is_terminal() {
            return Ok(task);
        }

        let slot = match self.registry.get(task.agent_id()) {
            Ok(slot) => slot,
            Err(_) => return self.cancel_unbound(task).await,
        };
        let mut entry = slot.lock().await?;

        let Some(mut task) = entry.active_task(task_id).cloned() else {
            drop(entry);
            return self.cancel_unbound(task).await;
        };
        if task.is_terminal() {
            return Ok(task);
        }

        let was_running = task.status() == TaskStatus::Running;
        task.cancel().map_err(EngineError::Conflict)?;
        self.store.save_task(&task).await?;

        if was_running {
            entry.active = Some(task.clone());
            drop(entry);
            self.logs
                .record(slot.id(), LogLevel::Warn, format!("cancelling running task {}", task_id))
                .await;
            let _ = self.commands.send(Command::Cancel { task_id }).await;
        } else {
            let mut next = entry.state.clone();
            let event = next.task_cancelled(task_id).map_err(EngineError::Conflict)?;
            self.registry.commit(&slot, &mut entry, next, &event).await?;
            entry.active = None;
        }

        self.publish(&task);
        Ok(task)
    }

    /// Stops an agent and the invocation of its bound task
    pub async fn stop_agent(&self, agent_id: &str) -> EngineResult<AgentRecord> {
        let (record, cancelled) = self.registry.stop(agent_id).await?;
        if let Some(task) = cancelled {
            self.interrupt(&task).await;
            self.publish(&task);
        }
        Ok(record)
    }

    /// Asks the dispatch loop to stop the invocation of a task it started
    ///
    /// Targets the task alone: by the time the command is handled the agent
    /// may already run a newer task.
    async fn interrupt(&self, task: &Task) {
        if task.started_at().is_some() {
            let _ = self
                .commands
                .send(Command::Cancel { task_id: task.id() })
                .await;
        }
    }

    /// Waits for a task to reach a terminal state
    ///
    /// On timeout the task keeps running; only the wait is abandoned.
    pub async fn wait(&self, task_id: Uuid, timeout: Option<Duration>) -> EngineResult<Task> {
        let mut updates = self.updates.subscribe();
        let task = self.status(task_id).await?;
        if task.is_terminal() {
            return Ok(task);
        }

        let wait = async {
            loop {
                match updates.recv().await {
                    Ok(task) if task.id() == task_id && task.is_terminal() => return Ok(task),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let task = self.status(task_id).await?;
                        if task.is_terminal() {
                            return Ok(task);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(EngineError::Conflict(
                            "Scheduler shut down while waiting".to_string(),
                        ))
                    }
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                EngineError::Timeout(format!(
                    "Task {} did not finish within {:?}",
                    task_id, limit
                ))
            })?,
            None => wait.await,
        }
    }

    /// Refuses new submissions, then asks the dispatch loop to cancel
    /// everything in flight and exit
    pub async fn shutdown(&self) {
        self.closing.cancel();
        let _ = self.commands.send(Command::Shutdown).await;
    }

    fn publish(&self, task: &Task) {
        // No receivers is fine
        let _ = self.updates.send(task.clone());
    }

    /// Cancels a task that is not bound to any live agent
    async fn cancel_unbound(&self, mut task: Task) -> EngineResult<Task> {
        task.cancel().map_err(EngineError::Conflict)?;
        self.store.save_task(&task).await?;
        self.publish(&task);
        Ok(task)
    }

    /// Runs one dispatched task to completion
    #[instrument(skip(self, token))]
    async fn execute(
        &self,
        agent_id: &str,
        task_id: Uuid,
        token: CancellationToken,
    ) -> EngineResult<()> {
        let slot = self.registry.get(agent_id)?;

        let request = {
            let mut entry = slot.lock().await?;
            let Some(mut task) = entry.active_task(task_id).cloned() else {
                tracing::debug!("Task no longer bound to agent, skipping");
                return Ok(());
            };
            if task.status() != TaskStatus::Pending {
                tracing::debug!(status = %task.status(), "Task no longer pending, skipping");
                return Ok(());
            }

            task.start().map_err(EngineError::Conflict)?;
            self.store.save_task(&task).await?;
            entry.active = Some(task.clone());
            self.publish(&task);
            self.logs
                .record(agent_id, LogLevel::Info, format!("task {} started", task_id))
                .await;

            InvocationRequest {
                task_id,
                config: slot.config().clone(),
                prompt: task.prompt().to_string(),
                session_id: if task.resumes_session() {
                    entry.state.session_id.clone()
                } else {
                    None
                },
            }
        };

        let (progress, mut progress_rx) = mpsc::unbounded_channel();
        let invocation = self.invoker.invoke(request, progress);
        tokio::pin!(invocation);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break None,
                result = &mut invocation => break Some(result),
                Some(event) = progress_rx.recv() => {
                    self.logs.record(agent_id, LogLevel::Debug, event.to_string()).await;
                }
            }
        };
        while let Ok(event) = progress_rx.try_recv() {
            self.logs
                .record(agent_id, LogLevel::Debug, event.to_string())
                .await;
        }

        self.finish(&slot, task_id, outcome).await
    }

    /// Applies an invocation outcome under the agent lock
    ///
    /// `None` means the invocation was cancelled before it returned.
    async fn finish(
        &self,
        slot: &AgentSlot,
        task_id: Uuid,
        outcome: Option<Result<InvocationOutput, InvocationError>>,
    ) -> EngineResult<()> {
        let agent_id = slot.id();
        let mut entry = slot.lock().await?;

        let Some(mut task) = entry.active_task(task_id).cloned() else {
            tracing::debug!(task_id = %task_id, "Discarding late result of an unbound task");
            return Ok(());
        };

        let mut next = entry.state.clone();
        let event = match outcome {
            Some(Ok(output)) if task.status() != TaskStatus::Cancelled => {
                let session_id = output.session_id.clone();
                task.complete(
                    output.text,
                    output.session_id,
                    output.cost_usd,
                    output.turns_used,
                )
                .map_err(EngineError::Conflict)?;
                self.store.save_task(&task).await?;
                next.task_succeeded(task_id, session_id)
                    .map_err(EngineError::Conflict)?
            }
            Some(Err(error)) if task.status() != TaskStatus::Cancelled => {
                let message = error.to_string();
                task.fail(message.clone()).map_err(EngineError::Conflict)?;
                self.store.save_task(&task).await?;
                next.task_failed(task_id, message)
                    .map_err(EngineError::Conflict)?
            }
            _ => {
                if !task.is_terminal() {
                    task.cancel().map_err(EngineError::Conflict)?;
                    self.store.save_task(&task).await?;
                }
                next.task_cancelled(task_id).map_err(EngineError::Conflict)?
            }
        };

        self.registry.commit(slot, &mut entry, next, &event).await?;
        entry.active = None;

        let config = slot.config();
        let mut next = entry.state.clone();
        if let Some(restart) = next.auto_restart(config.auto_restart, config.max_restarts) {
            self.registry.commit(slot, &mut entry, next, &restart).await?;
        }

        tracing::info!(task_id = %task_id, status = %task.status(), agent_id = %agent_id, "Task finished");
        self.publish(&task);
        Ok(())
    }
}

/// Single scheduling context owning every in-flight invocation
pub struct DispatchLoop {
    scheduler: Arc<TaskScheduler>,
    receiver: mpsc::Receiver<Command>,
    jobs: JoinSet<Uuid>,
    in_flight: HashMap<Uuid, CancellationToken>,
}

impl DispatchLoop {
    pub async fn run(mut self) {
        tracing::info!("Dispatch loop started");

        loop {
            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(Command::Submit { agent_id, task_id }) => self.spawn(agent_id, task_id),
                    Some(Command::Cancel { task_id }) => {
                        if let Some(token) = self.in_flight.get(&task_id) {
                            token.cancel();
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(joined) = self.jobs.join_next(), if !self.jobs.is_empty() => {
                    self.reap(joined);
                }
            }
        }

        tracing::info!(in_flight = self.in_flight.len(), "Dispatch loop stopping");
        for token in self.in_flight.values() {
            token.cancel();
        }
        while let Some(joined) = self.jobs.join_next().await {
            self.reap(joined);
        }
        tracing::info!("Dispatch loop stopped");
    }

    fn spawn(&mut self, agent_id: String, task_id: Uuid) {
        let token = CancellationToken::new();
        self.in_flight.insert(task_id, token.clone());

        let scheduler = self.scheduler.clone();
        self.jobs.spawn(async move {
            if let Err(e) = scheduler.execute(&agent_id, task_id, token).await {
                tracing::error!(agent_id = %agent_id, task_id = %task_id, error = %e, "Task dispatch failed");
            }
            task_id
        });
    }

    fn reap(&mut self, joined: Result<Uuid, tokio::task::JoinError>) {
        match joined {
            Ok(task_id) => {
                self.in_flight.remove(&task_id);
            }
            Err(e) => tracing::error!(error = %e, "Dispatch job panicked"),
        }
    }
}
