use sqlx::SqlitePool;

use crate::domain::repositories::PersistenceResult;

/// Schema statements, each idempotent
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        config TEXT NOT NULL,
        status TEXT NOT NULL,
        session_id TEXT,
        current_task_id TEXT,
        last_error TEXT,
        restart_count INTEGER NOT NULL DEFAULT 0,
        started_at TEXT,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        prompt TEXT NOT NULL,
        status TEXT NOT NULL,
        result TEXT,
        error TEXT,
        session_id TEXT,
        cost_usd TEXT,
        turns_used INTEGER,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        workflow_id TEXT,
        subtask_index INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflows (
        id TEXT PRIMARY KEY,
        prompt TEXT NOT NULL,
        status TEXT NOT NULL,
        plan TEXT NOT NULL DEFAULT '[]',
        result TEXT,
        error TEXT,
        failed_subtask INTEGER,
        planner_task_id TEXT,
        assembly_task_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        completed_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subtasks (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        description TEXT NOT NULL,
        profile TEXT NOT NULL,
        agent_id TEXT,
        task_id TEXT,
        status TEXT NOT NULL,
        result TEXT,
        error TEXT,
        UNIQUE(workflow_id, seq),
        FOREIGN KEY (workflow_id) REFERENCES workflows(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_agent ON tasks(agent_id)",
    "CREATE INDEX IF NOT EXISTS idx_agent_logs_agent ON agent_logs(agent_id, id)",
];

pub(super) async fn create_schema(pool: &SqlitePool) -> PersistenceResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
