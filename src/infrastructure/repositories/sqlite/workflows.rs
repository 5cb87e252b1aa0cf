use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{parse_opt_uuid, parse_uuid, to_opt_u32, to_u32, SqliteStore};
use crate::domain::repositories::{PersistenceError, PersistenceResult, WorkflowRepository};
use crate::domain::workflow::{
    PlanStep, Subtask, SubtaskStatus, WorkerProfile, Workflow, WorkflowStatus,
};

fn parse_workflow_row(row: &SqliteRow) -> PersistenceResult<Workflow> {
    let id: String = row.try_get("id")?;
    let plan_json: String = row.try_get("plan")?;
    let plan: Vec<PlanStep> = serde_json::from_str(&plan_json)?;

    Ok(Workflow::from_persistence(
        parse_uuid(&id)?,
        row.try_get("prompt")?,
        row.try_get::<WorkflowStatus, _>("status")?,
        plan,
        row.try_get("result")?,
        row.try_get("error")?,
        to_opt_u32(row.try_get("failed_subtask")?, "failed_subtask")?,
        parse_opt_uuid(row.try_get("planner_task_id")?)?,
        parse_opt_uuid(row.try_get("assembly_task_id")?)?,
        row.try_get::<DateTime<Utc>, _>("created_at")?,
        row.try_get::<DateTime<Utc>, _>("updated_at")?,
        row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
    ))
}

fn parse_subtask_row(row: &SqliteRow) -> PersistenceResult<Subtask> {
    let id: String = row.try_get("id")?;
    let workflow_id: String = row.try_get("workflow_id")?;
    let profile: String = row.try_get("profile")?;

    Ok(Subtask {
        id: parse_uuid(&id)?,
        workflow_id: parse_uuid(&workflow_id)?,
        index: to_u32(row.try_get("seq")?, "seq")?,
        description: row.try_get("description")?,
        profile: profile
            .parse::<WorkerProfile>()
            .map_err(PersistenceError::Corrupt)?,
        agent_id: row.try_get("agent_id")?,
        task_id: parse_opt_uuid(row.try_get("task_id")?)?,
        status: row.try_get::<SubtaskStatus, _>("status")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl WorkflowRepository for SqliteStore {
    async fn save_workflow(&self, workflow: &Workflow) -> PersistenceResult<()> {
        let plan_json = serde_json::to_string(workflow.plan())?;

        sqlx::query(
            r#"
            INSERT INTO workflows (
                id, prompt, status, plan, result, error, failed_subtask,
                planner_task_id, assembly_task_id, created_at, updated_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                plan = excluded.plan,
                result = excluded.result,
                error = excluded.error,
                failed_subtask = excluded.failed_subtask,
                planner_task_id = excluded.planner_task_id,
                assembly_task_id = excluded.assembly_task_id,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(workflow.id().to_string())
        .bind(workflow.prompt())
        .bind(workflow.status())
        .bind(plan_json)
        .bind(workflow.result())
        .bind(workflow.error())
        .bind(workflow.failed_subtask().map(i64::from))
        .bind(workflow.planner_task_id().map(|id| id.to_string()))
        .bind(workflow.assembly_task_id().map(|id| id.to_string()))
        .bind(workflow.created_at())
        .bind(workflow.updated_at())
        .bind(workflow.completed_at())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn load_workflow(&self, id: Uuid) -> PersistenceResult<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(parse_workflow_row).transpose()
    }

    async fn list_workflows(&self) -> PersistenceResult<Vec<Workflow>> {
        let rows = sqlx::query("SELECT * FROM workflows ORDER BY rowid DESC")
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(parse_workflow_row).collect()
    }

    async fn save_subtask(&self, subtask: &Subtask) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subtasks (
                id, workflow_id, seq, description, profile,
                agent_id, task_id, status, result, error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (workflow_id, seq) DO UPDATE SET
                agent_id = excluded.agent_id,
                task_id = excluded.task_id,
                status = excluded.status,
                result = excluded.result,
                error = excluded.error
            "#,
        )
        .bind(subtask.id.to_string())
        .bind(subtask.workflow_id.to_string())
        .bind(i64::from(subtask.index))
        .bind(&subtask.description)
        .bind(subtask.profile.as_str())
        .bind(subtask.agent_id.as_deref())
        .bind(subtask.task_id.map(|id| id.to_string()))
        .bind(subtask.status)
        .bind(subtask.result.as_deref())
        .bind(subtask.error.as_deref())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn list_subtasks(&self, workflow_id: Uuid) -> PersistenceResult<Vec<Subtask>> {
        let rows = sqlx::query("SELECT * FROM subtasks WHERE workflow_id = ? ORDER BY seq ASC")
            .bind(workflow_id.to_string())
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(parse_subtask_row).collect()
    }
}
