//! SQLite storage implementation.
//!
//! One database holds both the scheduled jobs and the pending job commands,
//! so a single [`SqliteStorage`] serves as the scheduler's persister and as
//! the ingester's command store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{JobPersister, PersistError};
use crate::core::job::{Job, JobState, ScheduledJob};
use crate::core::types::{CommandId, JobId, RequesterId};
use crate::ingest::{CommandKind, CommandStore, CommandStoreError, JobCommand};

type JobRow = (
    String,
    String,
    Option<Vec<u8>>,
    Option<i64>,
    String,
    Option<String>,
    Option<i64>,
);

type CommandRow = (i64, String, String, String, Option<Vec<u8>>, Option<i64>);

/// SQLite storage backend.
///
/// Creates its tables on open if they do not exist yet.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| PersistError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| PersistError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory database (useful for testing).
    pub async fn in_memory() -> Result<Self, PersistError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| PersistError::Other(e.to_string()))?;

        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| PersistError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), PersistError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| PersistError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(|at| at.timestamp_millis())
}

fn from_millis(millis: Option<i64>) -> Result<Option<DateTime<Utc>>, String> {
    millis
        .map(|ms| {
            DateTime::from_timestamp_millis(ms).ok_or_else(|| format!("invalid instant: {}", ms))
        })
        .transpose()
}

fn row_to_scheduled_job(row: JobRow) -> Result<ScheduledJob, PersistError> {
    let (id, job_type, data, scheduled_at, state, requester_id, timeout_at) = row;
    let job = Job::new(id, job_type)
        .with_optional_data(data)
        .with_optional_scheduled_at(from_millis(scheduled_at).map_err(PersistError::Serialization)?);
    let state = state
        .parse::<JobState>()
        .map_err(|e| PersistError::Serialization(e.to_string()))?;
    Ok(ScheduledJob::from_parts(
        job,
        state,
        requester_id.map(RequesterId::new),
        from_millis(timeout_at).map_err(PersistError::Serialization)?,
    ))
}

fn row_to_command(row: CommandRow) -> Result<JobCommand, CommandStoreError> {
    let (command_id, command, job_id, job_type, data, scheduled_at) = row;
    let kind = command.parse::<CommandKind>()?;
    let job = Job::new(job_id, job_type)
        .with_optional_data(data)
        .with_optional_scheduled_at(
            from_millis(scheduled_at).map_err(CommandStoreError::Serialization)?,
        );
    Ok(JobCommand::new(kind, job).with_command_id(CommandId::new(command_id)))
}

#[async_trait]
impl JobPersister for SqliteStorage {
    async fn create(&self, job: &ScheduledJob) -> Result<(), PersistError> {
        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (id, job_type, data, scheduled_at, state, requester_id, timeout_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id().as_str())
        .bind(job.job().job_type())
        .bind(job.job().data())
        .bind(to_millis(job.job().scheduled_at()))
        .bind(job.state().as_str())
        .bind(job.requester_id().map(RequesterId::as_str))
        .bind(to_millis(job.timeout_at()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(PersistError::DuplicateKey(format!("job: {}", job.id())))
            }
            Err(e) => Err(PersistError::Other(e.to_string())),
        }
    }

    async fn update(&self, job: &ScheduledJob) -> Result<(), PersistError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs SET state = ?, requester_id = ?, timeout_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.state().as_str())
        .bind(job.requester_id().map(RequesterId::as_str))
        .bind(to_millis(job.timeout_at()))
        .bind(job.id().as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| PersistError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(PersistError::NotFound(format!("job: {}", job.id())));
        }
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> Result<(), PersistError> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| PersistError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(PersistError::NotFound(format!("job: {}", job_id)));
        }
        Ok(())
    }

    async fn find_all_jobs(&self) -> Result<Vec<ScheduledJob>, PersistError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT id, job_type, data, scheduled_at, state, requester_id, timeout_at FROM scheduled_jobs ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_scheduled_job).collect()
    }
}

#[async_trait]
impl CommandStore for SqliteStorage {
    async fn append(&self, command: JobCommand) -> Result<CommandId, CommandStoreError> {
        let job = command.job();
        let result = sqlx::query(
            r#"
            INSERT INTO job_commands (command, job_id, job_type, data, scheduled_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(command.kind().as_str())
        .bind(job.id().as_str())
        .bind(job.job_type())
        .bind(job.data())
        .bind(to_millis(job.scheduled_at()))
        .execute(&self.pool)
        .await
        .map_err(|e| CommandStoreError::Other(e.to_string()))?;

        Ok(CommandId::new(result.last_insert_rowid()))
    }

    async fn find_pending(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<JobCommand>, CommandStoreError> {
        // A negative LIMIT means no limit in SQLite.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows: Vec<CommandRow> = sqlx::query_as(
            "SELECT command_id, command, job_id, job_type, data, scheduled_at FROM job_commands ORDER BY command_id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CommandStoreError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_command).collect()
    }

    async fn delete(&self, command_ids: &[CommandId]) -> Result<usize, CommandStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CommandStoreError::Other(e.to_string()))?;

        let mut deleted = 0;
        for command_id in command_ids {
            let result = sqlx::query("DELETE FROM job_commands WHERE command_id = ?")
                .bind(command_id.value())
                .execute(&mut *tx)
                .await
                .map_err(|e| CommandStoreError::Other(e.to_string()))?;
            deleted += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| CommandStoreError::Other(e.to_string()))?;
        Ok(deleted)
    }
}
