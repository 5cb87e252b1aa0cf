//! SQLite implementation of the persistence adapter
//!
//! One [`SqliteStore`] implements every repository trait over a single
//! connection pool. The database runs in WAL mode with a busy timeout so
//! that concurrent writers wait for each other instead of failing.

mod agents;
mod logs;
mod schema;
mod tasks;
mod workflows;

use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::repositories::{PersistenceError, PersistenceResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 5;

/// SQLx-backed store for agents, tasks, workflows, subtasks and log lines
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to a SQLite database and creates the schema if needed
    ///
    /// # Arguments
    /// * `url` - `sqlite://path/to/file.db` or `sqlite::memory:`
    ///
    /// In-memory databases use a single long-lived connection, since every
    /// new connection would otherwise see an empty database.
    pub async fn connect(url: &str) -> PersistenceResult<Self> {
        let in_memory = url.contains(":memory:");

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
        };

        tracing::info!(url = %url, in_memory, "Connecting to SQLite database");
        let pool = pool_options.connect_with(options).await?;

        schema::create_schema(&pool).await?;
        tracing::info!("SQLite schema ready");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks that the database answers
    pub async fn health_check(&self) -> PersistenceResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_uuid(value: &str) -> PersistenceResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| PersistenceError::Corrupt(format!("bad uuid '{}': {}", value, e)))
}

fn parse_opt_uuid(value: Option<String>) -> PersistenceResult<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

fn parse_opt_decimal(value: Option<String>) -> PersistenceResult<Option<Decimal>> {
    value
        .as_deref()
        .map(|v| {
            Decimal::from_str(v)
                .map_err(|e| PersistenceError::Corrupt(format!("bad decimal '{}': {}", v, e)))
        })
        .transpose()
}

fn to_u32(value: i64, column: &str) -> PersistenceResult<u32> {
    u32::try_from(value)
        .map_err(|_| PersistenceError::Corrupt(format!("{} out of range: {}", column, value)))
}

fn to_opt_u32(value: Option<i64>, column: &str) -> PersistenceResult<Option<u32>> {
    value.map(|v| to_u32(v, column)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_helpers_reject_garbage() {
        assert!(parse_uuid("not-a-uuid").is_err());
        assert!(parse_opt_decimal(Some("1.2.3".to_string())).is_err());
        assert!(to_u32(-1, "turns_used").is_err());
    }

    #[test]
    fn parse_helpers_pass_through_none() {
        assert_eq!(parse_opt_uuid(None).unwrap(), None);
        assert_eq!(parse_opt_decimal(None).unwrap(), None);
        assert_eq!(to_opt_u32(None, "x").unwrap(), None);
    }

    #[tokio::test]
    async fn connect_in_memory_creates_schema() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.health_check().await.unwrap();

        // Second run must be a no-op
        schema::create_schema(store.pool()).await.unwrap();
    }
}
