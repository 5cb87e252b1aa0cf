//! Integration tests for the SQLite persistence adapter
//!
//! These tests verify that every record written through the store reloads
//! with identical field values, including after the database is closed and
//! reopened, and that the engine rehydrates interrupted work on startup.

mod common;

use conclave_api::domain::agent::{AgentConfig, AgentRecord, AgentSpec, AgentStatus};
use conclave_api::domain::log::{LogLevel, LogLine};
use conclave_api::domain::repositories::{
    AgentRepository, LogRepository, Store, TaskRepository, WorkflowRepository,
};
use conclave_api::domain::task::{Task, TaskStatus};
use conclave_api::domain::workflow::{
    PlanStep, Subtask, SubtaskStatus, WorkerProfile, Workflow, WorkflowStatus,
};
use conclave_api::engine::{Engine, EngineSettings};
use conclave_api::infrastructure::repositories::SqliteStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Set up a file-backed database in a fresh temporary directory
async fn setup_store() -> (SqliteStore, TempDir, String) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = format!("sqlite://{}", dir.path().join("conclave.db").display());
    let store = SqliteStore::connect(&url).await.expect("connect");
    (store, dir, url)
}

fn agent(id: &str) -> AgentRecord {
    let mut spec = AgentSpec::new("Coder", "Write code");
    spec.id = Some(id.to_string());
    spec.capabilities = Some(vec!["Read".to_string(), "WebSearch".to_string()]);
    spec.max_budget_usd = Some(Decimal::new(150, 2));
    spec.cwd = Some("/tmp/project".to_string());
    spec.auto_restart = Some(true);
    AgentRecord::new(AgentConfig::from_spec(spec).unwrap())
}

fn plan() -> Vec<PlanStep> {
    vec![
        PlanStep {
            description: "Survey".to_string(),
            profile: WorkerProfile::Researcher,
        },
        PlanStep {
            description: "Build".to_string(),
            profile: WorkerProfile::Coder,
        },
    ]
}

#[tokio::test]
async fn agent_round_trip_and_delete() {
    let (store, _dir, _url) = setup_store().await;

    let mut record = agent("coder");
    record.state.start();
    record.state.begin_task(Uuid::new_v4()).unwrap();
    store.save_agent(&record).await.unwrap();

    let loaded = store.load_agent("coder").await.unwrap().unwrap();
    assert_eq!(loaded, record);
    assert_eq!(loaded.state.status, AgentStatus::Running);

    // Upsert replaces the runtime state
    record.state.stop();
    store.save_agent(&record).await.unwrap();
    assert_eq!(store.list_agents().await.unwrap(), vec![record]);

    store
        .append_log("coder", &LogLine::new(LogLevel::Info, "hello"))
        .await
        .unwrap();
    assert!(store.delete_agent("coder").await.unwrap());
    assert!(!store.delete_agent("coder").await.unwrap());
    assert!(store.load_agent("coder").await.unwrap().is_none());
    assert!(store.tail_log("coder", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn agents_are_listed_by_id() {
    let (store, _dir, _url) = setup_store().await;
    for id in ["b", "c", "a"] {
        store.save_agent(&agent(id)).await.unwrap();
    }

    let ids: Vec<String> = store
        .list_agents()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.config.id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn task_round_trip_keeps_every_field() {
    let (store, _dir, _url) = setup_store().await;

    let workflow_id = Uuid::new_v4();
    let mut task = Task::new("coder".to_string(), "Write a test".to_string())
        .unwrap()
        .with_workflow(workflow_id, Some(1));
    task.start().unwrap();
    task.complete(
        "done".to_string(),
        Some("sess-9".to_string()),
        Some(Decimal::new(1234, 4)),
        Some(7),
    )
    .unwrap();
    store.save_task(&task).await.unwrap();

    let loaded = store.load_task(task.id()).await.unwrap().unwrap();
    assert_eq!(loaded, task);
    assert_eq!(loaded.cost_usd(), Some(Decimal::new(1234, 4)));
    assert!(store.load_task(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn tasks_list_newest_first_with_agent_filter() {
    let (store, _dir, _url) = setup_store().await;

    let first = Task::new("a".to_string(), "one".to_string()).unwrap();
    let second = Task::new("b".to_string(), "two".to_string()).unwrap();
    let third = Task::new("a".to_string(), "three".to_string()).unwrap();
    for task in [&first, &second, &third] {
        store.save_task(task).await.unwrap();
    }

    let all: Vec<Uuid> = store
        .list_tasks(None)
        .await
        .unwrap()
        .iter()
        .map(Task::id)
        .collect();
    assert_eq!(all, vec![third.id(), second.id(), first.id()]);

    let only_a: Vec<Uuid> = store
        .list_tasks(Some("a"))
        .await
        .unwrap()
        .iter()
        .map(Task::id)
        .collect();
    assert_eq!(only_a, vec![third.id(), first.id()]);
}

#[tokio::test]
async fn workflow_and_subtasks_round_trip() {
    let (store, _dir, _url) = setup_store().await;

    let mut workflow = Workflow::new("Build X".to_string()).unwrap();
    workflow.set_planner_task(Uuid::new_v4());
    workflow.begin_running(plan()).unwrap();
    store.save_workflow(&workflow).await.unwrap();

    let mut first = Subtask::new(workflow.id(), 0, &plan()[0]);
    let second = Subtask::new(workflow.id(), 1, &plan()[1]);
    first.assign("worker-researcher-1".to_string(), Uuid::new_v4()).unwrap();
    first
        .finish(SubtaskStatus::Completed, Some("notes".to_string()), None)
        .unwrap();
    store.save_subtask(&second).await.unwrap();
    store.save_subtask(&first).await.unwrap();

    let loaded = store.load_workflow(workflow.id()).await.unwrap().unwrap();
    assert_eq!(loaded, workflow);
    assert_eq!(loaded.plan(), plan().as_slice());

    let subtasks = store.list_subtasks(workflow.id()).await.unwrap();
    assert_eq!(subtasks, vec![first.clone(), second]);

    // Saving the same index again updates the row
    workflow.fail("stopped".to_string(), Some(1)).unwrap();
    store.save_workflow(&workflow).await.unwrap();
    let mut cancelled = subtasks[1].clone();
    assert!(cancelled.cancel());
    store.save_subtask(&cancelled).await.unwrap();

    let subtasks = store.list_subtasks(workflow.id()).await.unwrap();
    assert_eq!(subtasks.len(), 2);
    assert_eq!(subtasks[1].status, SubtaskStatus::Cancelled);
    assert_eq!(store.list_workflows().await.unwrap(), vec![workflow]);
}

#[tokio::test]
async fn log_tail_returns_most_recent_lines_oldest_first() {
    let (store, _dir, _url) = setup_store().await;

    for i in 0..5 {
        store
            .append_log("a", &LogLine::new(LogLevel::Info, format!("line {}", i)))
            .await
            .unwrap();
    }

    let tail: Vec<String> = store
        .tail_log("a", 3)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.message)
        .collect();
    assert_eq!(tail, vec!["line 2", "line 3", "line 4"]);

    assert_eq!(store.tail_log("a", 50).await.unwrap().len(), 5);
    assert!(store.tail_log("a", 0).await.unwrap().is_empty());
    assert!(store.tail_log("nobody", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn records_survive_reopening_the_database() {
    let (store, _dir, url) = setup_store().await;

    let record = agent("coder");
    let task = Task::new("coder".to_string(), "persist me".to_string()).unwrap();
    let workflow = Workflow::new("Durable".to_string()).unwrap();
    let line = LogLine::new(LogLevel::Warn, "careful");
    store.save_agent(&record).await.unwrap();
    store.save_task(&task).await.unwrap();
    store.save_workflow(&workflow).await.unwrap();
    store.append_log("coder", &line).await.unwrap();
    store.close().await;

    let reopened = SqliteStore::connect(&url).await.unwrap();
    assert_eq!(reopened.load_agent("coder").await.unwrap(), Some(record));
    assert_eq!(reopened.load_task(task.id()).await.unwrap(), Some(task));
    assert_eq!(
        reopened.load_workflow(workflow.id()).await.unwrap(),
        Some(workflow)
    );
    assert_eq!(reopened.tail_log("coder", 1).await.unwrap(), vec![line]);
}

#[tokio::test]
async fn concurrent_writers_do_not_conflict() {
    let (store, _dir, _url) = setup_store().await;
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..10 {
                let task = Task::new(format!("agent-{}", i), format!("task {}", j)).unwrap();
                store.save_task(&task).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.list_tasks(None).await.unwrap().len(), 80);
}

#[tokio::test]
async fn engine_restart_fails_interrupted_work() {
    let (store, _dir, _url) = setup_store().await;

    // State left behind by a process that died mid-task
    let task = Task::new("coder".to_string(), "half done".to_string()).unwrap();
    let mut record = agent("coder");
    record.state.start();
    record.state.begin_task(task.id()).unwrap();
    let mut running = task.clone();
    running.start().unwrap();

    let mut workflow = Workflow::new("Build X".to_string()).unwrap();
    workflow.begin_running(plan()).unwrap();
    let subtask = Subtask::new(workflow.id(), 0, &plan()[0]);

    store.save_agent(&record).await.unwrap();
    store.save_task(&running).await.unwrap();
    store.save_workflow(&workflow).await.unwrap();
    store.save_subtask(&subtask).await.unwrap();

    let shared: Arc<dyn Store> = Arc::new(store.clone());
    let invoker = common::ScriptedInvoker::new(|_| common::ok("unused"));
    let engine = Engine::init(shared, invoker, EngineSettings::default())
        .await
        .unwrap();

    let agent = engine.get_agent("coder").await.unwrap();
    assert_eq!(agent.state.status, AgentStatus::Error);
    assert!(agent.state.current_task_id.is_none());
    assert!(agent.state.last_error.unwrap().contains("engine restart"));

    let task = engine.task_status(task.id()).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);

    let result = engine.get_workflow(workflow.id()).await.unwrap();
    assert_eq!(result.workflow.status(), WorkflowStatus::Failed);
    assert_eq!(result.subtasks[0].status, SubtaskStatus::Cancelled);

    // The planner was created and persisted on init
    assert!(store.load_agent("planner").await.unwrap().is_some());

    let lines = engine.tail_logs("coder", 1).await.unwrap();
    assert!(lines[0].message.starts_with("recovered: running -> error"));
    engine.shutdown().await;
}
