use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{parse_opt_uuid, to_u32, SqliteStore};
use crate::domain::agent::{AgentConfig, AgentRecord, AgentRuntimeState, AgentStatus};
use crate::domain::repositories::{AgentRepository, PersistenceResult};

fn parse_agent_row(row: &SqliteRow) -> PersistenceResult<AgentRecord> {
    let config_json: String = row.try_get("config")?;
    let config: AgentConfig = serde_json::from_str(&config_json)?;

    let state = AgentRuntimeState {
        status: row.try_get::<AgentStatus, _>("status")?,
        session_id: row.try_get("session_id")?,
        current_task_id: parse_opt_uuid(row.try_get("current_task_id")?)?,
        last_error: row.try_get("last_error")?,
        restart_count: to_u32(row.try_get("restart_count")?, "restart_count")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
    };

    Ok(AgentRecord { config, state })
}

#[async_trait]
impl AgentRepository for SqliteStore {
    async fn save_agent(&self, agent: &AgentRecord) -> PersistenceResult<()> {
        let config_json = serde_json::to_string(&agent.config)?;
        let state = &agent.state;

        sqlx::query(
            r#"
            INSERT INTO agents (
                id, config, status, session_id, current_task_id,
                last_error, restart_count, started_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                config = excluded.config,
                status = excluded.status,
                session_id = excluded.session_id,
                current_task_id = excluded.current_task_id,
                last_error = excluded.last_error,
                restart_count = excluded.restart_count,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(agent.id())
        .bind(config_json)
        .bind(state.status)
        .bind(state.session_id.as_deref())
        .bind(state.current_task_id.map(|id| id.to_string()))
        .bind(state.last_error.as_deref())
        .bind(i64::from(state.restart_count))
        .bind(state.started_at)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn load_agent(&self, id: &str) -> PersistenceResult<Option<AgentRecord>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(parse_agent_row).transpose()
    }

    async fn list_agents(&self) -> PersistenceResult<Vec<AgentRecord>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY id ASC")
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(parse_agent_row).collect()
    }

    async fn delete_agent(&self, id: &str) -> PersistenceResult<bool> {
        let mut tx = self.pool().begin().await?;

        let deleted = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM agent_logs WHERE agent_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted > 0)
    }
}
