use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::SqliteStore;
use crate::domain::log::{LogLevel, LogLine};
use crate::domain::repositories::{LogRepository, PersistenceResult};

#[async_trait]
impl LogRepository for SqliteStore {
    async fn append_log(&self, agent_id: &str, line: &LogLine) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO agent_logs (agent_id, timestamp, level, message) VALUES (?, ?, ?, ?)",
        )
        .bind(agent_id)
        .bind(line.timestamp)
        .bind(line.level)
        .bind(&line.message)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn tail_log(&self, agent_id: &str, n: usize) -> PersistenceResult<Vec<LogLine>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT timestamp, level, message FROM (
                SELECT id, timestamp, level, message
                FROM agent_logs
                WHERE agent_id = ?
                ORDER BY id DESC
                LIMIT ?
            )
            ORDER BY id ASC
            "#,
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LogLine {
                    timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
                    level: row.try_get::<LogLevel, _>("level")?,
                    message: row.try_get("message")?,
                })
            })
            .collect()
    }
}
