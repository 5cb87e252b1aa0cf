//! Integration tests for agent lifecycle and task scheduling
//!
//! Run the full engine (registry, dispatch loop, log store) over the
//! in-memory store with a scripted model.

mod common;

use common::{engine_with, fail, idle_agent, ok, ScriptedInvoker, Step, WAIT};
use conclave_api::domain::agent::{AgentSpec, AgentStatus};
use conclave_api::domain::task::TaskStatus;
use conclave_api::engine::{Engine, EngineError, InvocationOutput};
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

async fn wait_for_status(engine: &Engine, task_id: Uuid, status: TaskStatus) {
    for _ in 0..500 {
        if engine.task_status(task_id).await.unwrap().status() == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {}", task_id, status);
}

async fn wait_for_agent(engine: &Engine, agent_id: &str, status: AgentStatus) {
    for _ in 0..500 {
        if engine.get_agent(agent_id).await.unwrap().state.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("agent {} never reached {}", agent_id, status);
}

#[tokio::test]
async fn planner_is_registered_and_started_on_init() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| ok("x"))).await;

    let planner = engine.get_agent("planner").await.unwrap();
    assert_eq!(planner.state.status, AgentStatus::Idle);
    assert_eq!(planner.config.model, "opus");
    assert_eq!(planner.config.max_turns, 200);
    assert!(planner.config.auto_restart);
}

#[tokio::test]
async fn successful_task_completes_and_stores_session() {
    let invoker = ScriptedInvoker::new(|_| {
        Step::Reply(Ok(InvocationOutput {
            text: "hello".to_string(),
            session_id: Some("sess-1".to_string()),
            cost_usd: Some(Decimal::new(42, 3)),
            turns_used: Some(2),
        }))
    });
    let (engine, _store) = engine_with(invoker.clone()).await;
    idle_agent(&engine, "a", false, 3).await;

    let task = engine.submit_task("a", "say hello").await.unwrap();
    let task = engine.wait_for_task(task.id(), WAIT).await.unwrap();

    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.result(), Some("hello"));
    assert_eq!(task.cost_usd(), Some(Decimal::new(42, 3)));
    assert_eq!(task.turns_used(), Some(2));
    assert!(task.started_at().is_some());

    let agent = engine.get_agent("a").await.unwrap();
    assert_eq!(agent.state.status, AgentStatus::Idle);
    assert_eq!(agent.state.session_id.as_deref(), Some("sess-1"));
    assert!(agent.state.current_task_id.is_none());

    // The next invocation resumes the stored session
    let second = engine.submit_task("a", "again").await.unwrap();
    engine.wait_for_task(second.id(), WAIT).await.unwrap();
    let calls = invoker.calls_for("a");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].session_id, None);
    assert_eq!(calls[1].session_id.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn second_submit_to_busy_agent_conflicts() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| Step::Hang)).await;
    idle_agent(&engine, "a", false, 3).await;

    let first = engine.submit_task("a", "one").await.unwrap();
    let err = engine.submit_task("a", "two").await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    wait_for_status(&engine, first.id(), TaskStatus::Running).await;
    let tasks = engine.list_tasks(Some("a")).await.unwrap();
    assert_eq!(tasks.len(), 1);

    let agent = engine.get_agent("a").await.unwrap();
    assert_eq!(agent.state.status, AgentStatus::Running);
    assert_eq!(agent.state.current_task_id, Some(first.id()));
}

#[tokio::test]
async fn submit_to_unknown_or_stopped_agent_fails() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| ok("x"))).await;

    assert!(matches!(
        engine.submit_task("ghost", "hi").await,
        Err(EngineError::NotFound(_))
    ));

    engine
        .create_agent({
            let mut spec = AgentSpec::new("Stopped", "prompt");
            spec.id = Some("s".to_string());
            spec
        })
        .await
        .unwrap();
    assert!(matches!(
        engine.submit_task("s", "hi").await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn auto_restart_is_bounded_by_max_restarts() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| fail("boom"))).await;
    idle_agent(&engine, "a", true, 2).await;

    let expected = [
        (AgentStatus::Idle, 1),
        (AgentStatus::Idle, 2),
        (AgentStatus::Error, 2),
    ];
    for (status, restarts) in expected {
        let task = engine.submit_task("a", "fail please").await.unwrap();
        let task = engine.wait_for_task(task.id(), WAIT).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task.error().unwrap().contains("boom"));

        let agent = engine.get_agent("a").await.unwrap();
        assert_eq!(agent.state.status, status);
        assert_eq!(agent.state.restart_count, restarts);
    }

    let agent = engine.get_agent("a").await.unwrap();
    assert!(agent.state.last_error.unwrap().contains("boom"));
    assert!(matches!(
        engine.submit_task("a", "more").await,
        Err(EngineError::Conflict(_))
    ));

    // An explicit start recovers and resets the counter
    let agent = engine.start_agent("a").await.unwrap();
    assert_eq!(agent.state.status, AgentStatus::Idle);
    assert_eq!(agent.state.restart_count, 0);
}

#[tokio::test]
async fn failure_without_auto_restart_leaves_agent_in_error() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| fail("nope"))).await;
    idle_agent(&engine, "a", false, 3).await;

    let task = engine.submit_task("a", "x").await.unwrap();
    engine.wait_for_task(task.id(), WAIT).await.unwrap();

    let agent = engine.get_agent("a").await.unwrap();
    assert_eq!(agent.state.status, AgentStatus::Error);
    assert_eq!(agent.state.restart_count, 0);
}

#[tokio::test]
async fn cancelling_running_task_returns_agent_to_idle() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| Step::Hang)).await;
    idle_agent(&engine, "a", false, 3).await;

    let task = engine.submit_task("a", "forever").await.unwrap();
    wait_for_status(&engine, task.id(), TaskStatus::Running).await;

    let cancelled = engine.cancel_task(task.id()).await.unwrap();
    assert_eq!(cancelled.status(), TaskStatus::Cancelled);

    wait_for_agent(&engine, "a", AgentStatus::Idle).await;
    let task = engine.task_status(task.id()).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(task.result().is_none());

    // Cancelling again is a no-op
    let again = engine.cancel_task(task.id()).await.unwrap();
    assert_eq!(again.status(), TaskStatus::Cancelled);
}

#[tokio::test]
async fn late_result_of_cancelled_task_is_discarded() {
    let invoker = ScriptedInvoker::new(|_| {
        Step::Delayed(Duration::from_millis(100), Ok(InvocationOutput::text("late")))
    });
    let (engine, _store) = engine_with(invoker).await;
    idle_agent(&engine, "a", false, 3).await;

    let task = engine.submit_task("a", "slow").await.unwrap();
    wait_for_status(&engine, task.id(), TaskStatus::Running).await;
    engine.cancel_task(task.id()).await.unwrap();

    wait_for_agent(&engine, "a", AgentStatus::Idle).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let task = engine.task_status(task.id()).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(task.result().is_none());
}

#[tokio::test]
async fn deleting_running_agent_conflicts() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| Step::Hang)).await;
    idle_agent(&engine, "a", false, 3).await;

    let task = engine.submit_task("a", "forever").await.unwrap();
    assert!(matches!(
        engine.delete_agent("a").await,
        Err(EngineError::Conflict(_))
    ));

    engine.cancel_task(task.id()).await.unwrap();
    wait_for_agent(&engine, "a", AgentStatus::Idle).await;

    engine.delete_agent("a").await.unwrap();
    assert!(engine
        .list_agents()
        .await
        .iter()
        .all(|record| record.id() != "a"));
    assert!(matches!(
        engine.get_agent("a").await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn stopping_agent_cancels_its_task() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| Step::Hang)).await;
    idle_agent(&engine, "a", false, 3).await;

    let task = engine.submit_task("a", "forever").await.unwrap();
    wait_for_status(&engine, task.id(), TaskStatus::Running).await;

    let agent = engine.stop_agent("a").await.unwrap();
    assert_eq!(agent.state.status, AgentStatus::Stopped);
    assert!(agent.state.current_task_id.is_none());

    let task = engine.wait_for_task(task.id(), WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Cancelled);

    // Stopping twice is a no-op, starting again makes the agent usable
    engine.stop_agent("a").await.unwrap();
    let agent = engine.start_agent("a").await.unwrap();
    assert_eq!(agent.state.status, AgentStatus::Idle);
}

#[tokio::test]
async fn wait_timeout_leaves_task_running() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| Step::Hang)).await;
    idle_agent(&engine, "a", false, 3).await;

    let task = engine.submit_task("a", "forever").await.unwrap();
    wait_for_status(&engine, task.id(), TaskStatus::Running).await;

    let err = engine
        .wait_for_task(task.id(), Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
    assert_eq!(
        engine.task_status(task.id()).await.unwrap().status(),
        TaskStatus::Running
    );
}

#[tokio::test]
async fn different_agents_run_concurrently() {
    let invoker = ScriptedInvoker::new(|_| {
        Step::Delayed(Duration::from_millis(200), Ok(InvocationOutput::text("done")))
    });
    let (engine, _store) = engine_with(invoker).await;
    idle_agent(&engine, "a", false, 3).await;
    idle_agent(&engine, "b", false, 3).await;

    let started = std::time::Instant::now();
    let a = engine.submit_task("a", "x").await.unwrap();
    let b = engine.submit_task("b", "y").await.unwrap();
    engine.wait_for_task(a.id(), WAIT).await.unwrap();
    engine.wait_for_task(b.id(), WAIT).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(390));
}

#[tokio::test]
async fn transitions_are_logged_and_tail_is_bounded() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| ok("done"))).await;
    idle_agent(&engine, "a", false, 3).await;

    let task = engine.submit_task("a", "x").await.unwrap();
    engine.wait_for_task(task.id(), WAIT).await.unwrap();

    let all = engine.tail_logs("a", 100).await.unwrap();
    assert!(all.len() >= 4);
    assert!(all.iter().any(|l| l.message.starts_with("start: stopped -> idle")));
    assert!(all.last().unwrap().message.starts_with("task_succeeded: running -> idle"));
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let tail = engine.tail_logs("a", 2).await.unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[1], *all.last().unwrap());

    assert!(matches!(
        engine.tail_logs("ghost", 5).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn invalid_agent_config_is_validation_error() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| ok("x"))).await;

    let mut spec = AgentSpec::new("Bad", "prompt");
    spec.capabilities = Some(vec!["Teleport".to_string()]);
    assert!(matches!(
        engine.create_agent(spec).await,
        Err(EngineError::Validation(_))
    ));

    assert!(matches!(
        engine.create_agent(AgentSpec::new("  ", "prompt")).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn shutdown_cancels_in_flight_tasks() {
    let (engine, _store) = engine_with(ScriptedInvoker::new(|_| Step::Hang)).await;
    idle_agent(&engine, "a", false, 3).await;

    let task = engine.submit_task("a", "forever").await.unwrap();
    wait_for_status(&engine, task.id(), TaskStatus::Running).await;

    engine.shutdown().await;

    let task = engine.task_status(task.id()).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Cancelled);
    let agent = engine.get_agent("a").await.unwrap();
    assert_eq!(agent.state.status, AgentStatus::Idle);
}

#[tokio::test]
async fn submissions_after_shutdown_are_refused() {
    let invoker = ScriptedInvoker::new(|_| ok("done"));
    let (engine, _store) = engine_with(invoker.clone()).await;
    idle_agent(&engine, "a", true, 3).await;

    engine.shutdown().await;

    let err = engine.submit_task("a", "hello").await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ref m) if m.contains("shutting down")));

    let agent = engine.get_agent("a").await.unwrap();
    assert_eq!(agent.state.status, AgentStatus::Idle);
    assert_eq!(agent.state.restart_count, 0);
    assert!(engine.list_tasks(Some("a")).await.unwrap().is_empty());
    assert!(invoker.calls().is_empty());
}
