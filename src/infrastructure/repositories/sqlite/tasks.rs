use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{parse_opt_decimal, parse_opt_uuid, parse_uuid, to_opt_u32, SqliteStore};
use crate::domain::repositories::{PersistenceResult, TaskRepository};
use crate::domain::task::{Task, TaskStatus};

fn parse_task_row(row: &SqliteRow) -> PersistenceResult<Task> {
    let id: String = row.try_get("id")?;

    Ok(Task::from_persistence(
        parse_uuid(&id)?,
        row.try_get("agent_id")?,
        row.try_get("prompt")?,
        row.try_get::<TaskStatus, _>("status")?,
        row.try_get("result")?,
        row.try_get("error")?,
        row.try_get("session_id")?,
        parse_opt_decimal(row.try_get("cost_usd")?)?,
        to_opt_u32(row.try_get("turns_used")?, "turns_used")?,
        row.try_get::<DateTime<Utc>, _>("created_at")?,
        row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        parse_opt_uuid(row.try_get("workflow_id")?)?,
        to_opt_u32(row.try_get("subtask_index")?, "subtask_index")?,
    ))
}

#[async_trait]
impl TaskRepository for SqliteStore {
    async fn save_task(&self, task: &Task) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, agent_id, prompt, status, result, error, session_id,
                cost_usd, turns_used, created_at, started_at, completed_at,
                workflow_id, subtask_index
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                result = excluded.result,
                error = excluded.error,
                session_id = excluded.session_id,
                cost_usd = excluded.cost_usd,
                turns_used = excluded.turns_used,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(task.id().to_string())
        .bind(task.agent_id())
        .bind(task.prompt())
        .bind(task.status())
        .bind(task.result())
        .bind(task.error())
        .bind(task.session_id())
        .bind(task.cost_usd().map(|c| c.to_string()))
        .bind(task.turns_used().map(i64::from))
        .bind(task.created_at())
        .bind(task.started_at())
        .bind(task.completed_at())
        .bind(task.workflow_id().map(|id| id.to_string()))
        .bind(task.subtask_index().map(i64::from))
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn load_task(&self, id: Uuid) -> PersistenceResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(parse_task_row).transpose()
    }

    async fn list_tasks(&self, agent_id: Option<&str>) -> PersistenceResult<Vec<Task>> {
        let rows = match agent_id {
            Some(agent_id) => {
                sqlx::query(
                    "SELECT * FROM tasks WHERE agent_id = ? ORDER BY rowid DESC",
                )
                .bind(agent_id)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM tasks ORDER BY rowid DESC")
                    .fetch_all(self.pool())
                    .await?
            }
        };

        rows.iter().map(parse_task_row).collect()
    }
}
