//! PostgreSQL job queue
//!
//! Jobs live in a `jobs` table. Workers claim the oldest waiting row with
//! `FOR UPDATE SKIP LOCKED`, so several server processes can share a queue.
//! The same claim picks up active rows whose lease ran out, which is how jobs
//! of a crashed process get back into circulation.

use async_trait::async_trait;
use poolforge_core::{DeployRequest, JobResult, JobStatus};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Enqueued, JobQueue, JobRecord, DEFAULT_LEASE};
use crate::storage::StorageError;

const JOB_COLUMNS: &str =
    "id, kind, payload, status, result, failed_reason, created_at, updated_at";

/// PostgreSQL queue implementation
#[derive(Debug, Clone)]
pub struct PostgresQueue {
    pool: PgPool,
    poll_interval: Duration,
    lease: Duration,
}

impl PostgresQueue {
    /// Create the queue on an existing pool and run migrations
    pub async fn new(pool: PgPool) -> Result<Self, StorageError> {
        let queue = Self {
            pool,
            poll_interval: Duration::from_millis(500),
            lease: DEFAULT_LEASE,
        };
        queue.run_migrations().await?;
        Ok(queue)
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id VARCHAR(255) PRIMARY KEY,
                kind VARCHAR(32) NOT NULL,
                payload TEXT NOT NULL,
                status VARCHAR(32) NOT NULL DEFAULT 'waiting',
                result TEXT,
                failed_reason TEXT,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_waiting ON jobs(status, enqueued_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        info!("Job queue migrations complete");
        Ok(())
    }
}

fn db_error(e: sqlx::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, StorageError> {
    let kind: String = row.try_get("kind").map_err(db_error)?;
    let status: String = row.try_get("status").map_err(db_error)?;
    let payload: String = row.try_get("payload").map_err(db_error)?;
    let result: Option<String> = row.try_get("result").map_err(db_error)?;

    Ok(JobRecord {
        id: row.try_get("id").map_err(db_error)?,
        kind: kind
            .parse()
            .map_err(|e: poolforge_core::CoreError| StorageError::Serialization(e.to_string()))?,
        payload: serde_json::from_str(&payload)?,
        status: status
            .parse()
            .map_err(|e: poolforge_core::CoreError| StorageError::Serialization(e.to_string()))?,
        result: result
            .as_deref()
            .map(serde_json::from_str::<JobResult>)
            .transpose()?,
        failed_reason: row.try_get("failed_reason").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

#[async_trait]
impl JobQueue for PostgresQueue {
    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StorageError> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn enqueue(&self, payload: DeployRequest) -> Result<Enqueued, StorageError> {
        let body = serde_json::to_string(&payload)?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO jobs (id, kind, payload) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO NOTHING RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(&payload.job_id)
        .bind(payload.kind().as_str())
        .bind(&body)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        if let Some(row) = inserted {
            return Ok(Enqueued::Created(job_from_row(&row)?));
        }

        let requeued = sqlx::query(&format!(
            "UPDATE jobs SET status = 'waiting', payload = $2, kind = $3, failed_reason = NULL, \
             enqueued_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'failed' RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(&payload.job_id)
        .bind(&body)
        .bind(payload.kind().as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        if let Some(row) = requeued {
            return Ok(Enqueued::Created(job_from_row(&row)?));
        }

        self.get(&payload.job_id)
            .await?
            .map(Enqueued::Existing)
            .ok_or_else(|| StorageError::NotFound(format!("job {}", payload.job_id)))
    }

    async fn dequeue(&self) -> Result<Option<JobRecord>, StorageError> {
        let row = sqlx::query(&format!(
            r#"
            WITH claimed AS (
                SELECT id, status AS previous_status FROM jobs
                WHERE status = 'waiting'
                   OR (status = 'active' AND updated_at < NOW() - $1::float8 * INTERVAL '1 second')
                ORDER BY enqueued_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs SET status = 'active', updated_at = NOW()
            FROM claimed
            WHERE jobs.id = claimed.id
            RETURNING claimed.previous_status, {}
            "#,
            JOB_COLUMNS
                .split(", ")
                .map(|column| format!("jobs.{}", column))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job = job_from_row(&row)?;
        let previous: String = row.try_get("previous_status").map_err(db_error)?;
        if previous == JobStatus::Active.as_str() {
            warn!(job_id = %job.id, "Reclaimed job with expired lease");
        } else {
            debug!(job_id = %job.id, "Dequeued job");
        }
        Ok(Some(job))
    }

    async fn wait(&self, timeout: Duration) {
        tokio::time::sleep(timeout.min(self.poll_interval)).await;
    }

    async fn complete(&self, id: &str, result: JobResult) -> Result<JobRecord, StorageError> {
        let row = sqlx::query(&format!(
            "UPDATE jobs SET status = $2, result = $3, failed_reason = NULL, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(id)
        .bind(JobStatus::Completed.as_str())
        .bind(serde_json::to_string(&result)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref()
            .map(job_from_row)
            .transpose()?
            .ok_or_else(|| StorageError::NotFound(format!("job {}", id)))
    }

    async fn fail(&self, id: &str, reason: &str) -> Result<JobRecord, StorageError> {
        let row = sqlx::query(&format!(
            "UPDATE jobs SET status = $2, failed_reason = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(id)
        .bind(JobStatus::Failed.as_str())
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref()
            .map(job_from_row)
            .transpose()?
            .ok_or_else(|| StorageError::NotFound(format!("job {}", id)))
    }

    async fn remove(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn depth(&self) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS depth FROM jobs WHERE status = 'waiting'")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        let depth: i64 = row.try_get("depth").map_err(db_error)?;
        Ok(depth.max(0) as usize)
    }
}
