//! Durable FIFO job queue keyed by caller-supplied job ids
//!
//! A job is created on enqueue, moved to `active` by a worker, and ends
//! `completed` or `failed`. Finished jobs stay queryable until they are
//! explicitly removed by confirmation. A failed job leaves the dispatch
//! order but keeps its reason; enqueuing its id again puts it back.
//!
//! An `active` job is leased to the worker that took it. If it is neither
//! completed nor failed within the lease, because the process died or the
//! outcome could not be recorded, the next dequeue hands it out again.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryQueue;
#[cfg(feature = "postgres")]
pub use postgres::PostgresQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poolforge_core::{DeployRequest, JobResult, JobSnapshot, JobStatus, ResourceKind};
use std::fmt::Debug;
use std::time::Duration;

use crate::storage::StorageError;

/// Default time an active job may go without an update before it is
/// handed out again
pub const DEFAULT_LEASE: Duration = Duration::from_secs(15 * 60);

/// A job as held by the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: String,
    pub kind: ResourceKind,
    pub payload: DeployRequest,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(payload: DeployRequest) -> Self {
        let now = Utc::now();
        Self {
            id: payload.job_id.clone(),
            kind: payload.kind(),
            payload,
            status: JobStatus::Waiting,
            result: None,
            failed_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether an active job's lease has run out at `now`
    pub fn lease_expired(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        self.status == JobStatus::Active
            && (now - self.updated_at)
                .to_std()
                .map(|age| age >= lease)
                .unwrap_or(false)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            resource_public_key: self.result.as_ref().map(|r| r.resource_public_key.clone()),
            transaction_payload: self.result.as_ref().map(|r| r.transaction_payload.clone()),
            failed_reason: self.failed_reason.clone(),
        }
    }
}

/// Outcome of an enqueue call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// The job is new, or a failed job was put back in line
    Created(JobRecord),
    /// A job with this id is already waiting, running or completed
    Existing(JobRecord),
}

/// Job queue backend trait
#[async_trait]
pub trait JobQueue: Send + Sync + Debug {
    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StorageError>;

    /// Enqueue unless a live job with the same id exists.
    ///
    /// The existence check and the insert happen atomically.
    async fn enqueue(&self, payload: DeployRequest) -> Result<Enqueued, StorageError>;

    /// Take the oldest waiting job, or an active job whose lease ran out,
    /// and mark it active
    async fn dequeue(&self) -> Result<Option<JobRecord>, StorageError>;

    /// Wait until a job may be available or `timeout` elapses
    async fn wait(&self, timeout: Duration);

    async fn complete(&self, id: &str, result: JobResult) -> Result<JobRecord, StorageError>;

    async fn fail(&self, id: &str, reason: &str) -> Result<JobRecord, StorageError>;

    /// Delete a job outright; returns false if it did not exist
    async fn remove(&self, id: &str) -> Result<bool, StorageError>;

    /// Number of waiting jobs
    async fn depth(&self) -> Result<usize, StorageError>;
}
