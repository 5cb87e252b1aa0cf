//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use conclave_api::domain::agent::{AgentRecord, AgentSpec};
use conclave_api::domain::log::LogLine;
use conclave_api::domain::repositories::{
    AgentRepository, LogRepository, PersistenceResult, Store, TaskRepository, WorkflowRepository,
};
use conclave_api::domain::task::Task;
use conclave_api::domain::workflow::{Subtask, Workflow};
use conclave_api::engine::{
    Engine, EngineSettings, InvocationError, InvocationOutput, InvocationRequest, ModelInvoker,
    ProgressEvent, ProgressSender,
};
use conclave_api::infrastructure::repositories::InMemoryStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What the scripted model does with one request
pub enum Step {
    Reply(Result<InvocationOutput, InvocationError>),
    /// Replies after a delay
    Delayed(Duration, Result<InvocationOutput, InvocationError>),
    /// Never returns; only cancellation ends it
    Hang,
}

pub fn ok(text: &str) -> Step {
    Step::Reply(Ok(InvocationOutput::text(text)))
}

pub fn fail(message: &str) -> Step {
    Step::Reply(Err(InvocationError::Model(message.to_string())))
}

type Script = Box<dyn Fn(&InvocationRequest) -> Step + Send + Sync>;

/// Model invoker driven by a closure, recording every request it gets
pub struct ScriptedInvoker {
    script: Script,
    calls: Mutex<Vec<InvocationRequest>>,
}

impl ScriptedInvoker {
    pub fn new(script: impl Fn(&InvocationRequest) -> Step + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<InvocationRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, agent_id: &str) -> Vec<InvocationRequest> {
        self.calls()
            .into_iter()
            .filter(|r| r.config.id == agent_id)
            .collect()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
        progress: ProgressSender,
    ) -> Result<InvocationOutput, InvocationError> {
        self.calls.lock().push(request.clone());
        let _ = progress.send(ProgressEvent::Text(format!("working on {}", request.task_id)));

        match (self.script)(&request) {
            Step::Reply(result) => result,
            Step::Delayed(delay, result) => {
                tokio::time::sleep(delay).await;
                result
            }
            Step::Hang => std::future::pending().await,
        }
    }
}

pub async fn engine_with(invoker: Arc<ScriptedInvoker>) -> (Engine, Arc<dyn Store>) {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let engine = Engine::init(store.clone(), invoker, EngineSettings::default())
        .await
        .expect("engine init");
    (engine, store)
}

/// Creates and starts an agent with a fixed id
pub async fn idle_agent(engine: &Engine, id: &str, auto_restart: bool, max_restarts: u32) {
    let mut spec = AgentSpec::new(format!("Agent {}", id), "You help.");
    spec.id = Some(id.to_string());
    spec.auto_restart = Some(auto_restart);
    spec.max_restarts = Some(max_restarts);
    engine.create_agent(spec).await.expect("create agent");
    engine.start_agent(id).await.expect("start agent");
}

pub const WAIT: Option<Duration> = Some(Duration::from_secs(5));

/// Planner replies with `plan` for planning and "final answer" for assembly,
/// workers echo their step unless `failing_step` (1-based) matches
pub fn workflow_script(plan: &'static str, failing_step: Option<usize>) -> Arc<ScriptedInvoker> {
    ScriptedInvoker::new(move |request| {
        if request.config.id == "planner" {
            if request.prompt.contains("Break the following goal") {
                return ok(plan);
            }
            return ok("final answer");
        }

        let step = step_number(&request.prompt);
        if failing_step.is_some() && failing_step == step {
            return fail("worker crashed");
        }
        ok(&format!("result of step {}", step.unwrap_or(0)))
    })
}

/// Reads N out of "step N of M"
pub fn step_number(prompt: &str) -> Option<usize> {
    let start = prompt.find("step ")? + "step ".len();
    let rest = &prompt[start..];
    let end = rest.find(' ')?;
    rest[..end].parse().ok()
}

/// Model reply that also reports a session id
pub fn ok_in_session(text: &str, session_id: String) -> Step {
    Step::Reply(Ok(InvocationOutput {
        session_id: Some(session_id),
        ..InvocationOutput::text(text)
    }))
}

/// In-memory store whose workflow loads can be slowed down on demand
#[derive(Default)]
pub struct SlowLoadStore {
    inner: InMemoryStore,
    workflow_load_delay: Mutex<Option<Duration>>,
}

impl SlowLoadStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delay_workflow_loads(&self, delay: Duration) {
        *self.workflow_load_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl AgentRepository for SlowLoadStore {
    async fn save_agent(&self, agent: &AgentRecord) -> PersistenceResult<()> {
        self.inner.save_agent(agent).await
    }

    async fn load_agent(&self, id: &str) -> PersistenceResult<Option<AgentRecord>> {
        self.inner.load_agent(id).await
    }

    async fn list_agents(&self) -> PersistenceResult<Vec<AgentRecord>> {
        self.inner.list_agents().await
    }

    async fn delete_agent(&self, id: &str) -> PersistenceResult<bool> {
        self.inner.delete_agent(id).await
    }
}

#[async_trait]
impl TaskRepository for SlowLoadStore {
    async fn save_task(&self, task: &Task) -> PersistenceResult<()> {
        self.inner.save_task(task).await
    }

    async fn load_task(&self, id: Uuid) -> PersistenceResult<Option<Task>> {
        self.inner.load_task(id).await
    }

    async fn list_tasks(&self, agent_id: Option<&str>) -> PersistenceResult<Vec<Task>> {
        self.inner.list_tasks(agent_id).await
    }
}

#[async_trait]
impl WorkflowRepository for SlowLoadStore {
    async fn save_workflow(&self, workflow: &Workflow) -> PersistenceResult<()> {
        self.inner.save_workflow(workflow).await
    }

    async fn load_workflow(&self, id: Uuid) -> PersistenceResult<Option<Workflow>> {
        let delay = *self.workflow_load_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.load_workflow(id).await
    }

    async fn list_workflows(&self) -> PersistenceResult<Vec<Workflow>> {
        self.inner.list_workflows().await
    }

    async fn save_subtask(&self, subtask: &Subtask) -> PersistenceResult<()> {
        self.inner.save_subtask(subtask).await
    }

    async fn list_subtasks(&self, workflow_id: Uuid) -> PersistenceResult<Vec<Subtask>> {
        self.inner.list_subtasks(workflow_id).await
    }
}

#[async_trait]
impl LogRepository for SlowLoadStore {
    async fn append_log(&self, agent_id: &str, line: &LogLine) -> PersistenceResult<()> {
        self.inner.append_log(agent_id, line).await
    }

    async fn tail_log(&self, agent_id: &str, n: usize) -> PersistenceResult<Vec<LogLine>> {
        self.inner.tail_log(agent_id, n).await
    }
}
