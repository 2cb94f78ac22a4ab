//! In-memory job queue
//!
//! Default queue for development and tests. Jobs are lost on restart.
//! Expired leases are reclaimed on dequeue.

use async_trait::async_trait;
use chrono::Utc;
use poolforge_core::{DeployRequest, JobResult, JobStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::{Enqueued, JobQueue, JobRecord, DEFAULT_LEASE};
use crate::storage::StorageError;

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<String, JobRecord>,
    waiting: VecDeque<String>,
}

/// In-memory queue implementation
#[derive(Debug)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    lease: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            lease,
        }
    }

    fn finish<F>(&self, id: &str, update: F) -> Result<JobRecord, StorageError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("job {}", id)))?;
        update(job);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.get(id).cloned())
    }

    async fn enqueue(&self, payload: DeployRequest) -> Result<Enqueued, StorageError> {
        let enqueued = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            match state.jobs.get_mut(&payload.job_id) {
                Some(job) if job.status == JobStatus::Failed => {
                    job.status = JobStatus::Waiting;
                    job.payload = payload;
                    job.kind = job.payload.kind();
                    job.failed_reason = None;
                    job.updated_at = Utc::now();
                    let job = job.clone();
                    state.waiting.push_back(job.id.clone());
                    Enqueued::Created(job)
                }
                Some(job) => Enqueued::Existing(job.clone()),
                None => {
                    let job = JobRecord::new(payload);
                    state.waiting.push_back(job.id.clone());
                    state.jobs.insert(job.id.clone(), job.clone());
                    Enqueued::Created(job)
                }
            }
        };

        if matches!(enqueued, Enqueued::Created(_)) {
            self.notify.notify_one();
        }
        Ok(enqueued)
    }

    async fn dequeue(&self) -> Result<Option<JobRecord>, StorageError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let now = Utc::now();
        for job in state.jobs.values_mut() {
            if job.lease_expired(now, self.lease) {
                warn!(job_id = %job.id, since = %job.updated_at, "Reclaiming job with expired lease");
                job.status = JobStatus::Waiting;
                job.updated_at = now;
                state.waiting.push_front(job.id.clone());
            }
        }

        while let Some(id) = state.waiting.pop_front() {
            if let Some(job) = state.jobs.get_mut(&id) {
                if job.status != JobStatus::Waiting {
                    continue;
                }
                job.status = JobStatus::Active;
                job.updated_at = Utc::now();
                debug!(job_id = %id, "Dequeued job");
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    async fn complete(&self, id: &str, result: JobResult) -> Result<JobRecord, StorageError> {
        self.finish(id, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.failed_reason = None;
        })
    }

    async fn fail(&self, id: &str, reason: &str) -> Result<JobRecord, StorageError> {
        self.finish(id, |job| {
            job.status = JobStatus::Failed;
            job.failed_reason = Some(reason.to_string());
        })
    }

    async fn remove(&self, id: &str) -> Result<bool, StorageError> {
        let mut state = self.state.lock().unwrap();
        state.waiting.retain(|queued| queued != id);
        Ok(state.jobs.remove(id).is_some())
    }

    async fn depth(&self) -> Result<usize, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Waiting)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolforge_core::ResourceParams;

    fn request(id: &str) -> DeployRequest {
        DeployRequest {
            job_id: id.into(),
            requester: "U1".into(),
            network: "net-1".into(),
            params: ResourceParams::pool("MINA", "TOK"),
        }
    }

    fn result() -> JobResult {
        JobResult {
            resource_public_key: "key".into(),
            transaction_payload: "payload".into(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_returns_existing() {
        let queue = MemoryQueue::new();

        assert!(matches!(queue.enqueue(request("a")).await.unwrap(), Enqueued::Created(_)));
        assert!(matches!(queue.enqueue(request("a")).await.unwrap(), Enqueued::Existing(_)));
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo() {
        let queue = MemoryQueue::new();
        for id in ["a", "b", "c"] {
            queue.enqueue(request(id)).await.unwrap();
        }

        let order: Vec<String> = [
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
        ]
        .into_iter()
        .map(|job| job.unwrap().id)
        .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_job_can_be_requeued() {
        let queue = MemoryQueue::new();
        queue.enqueue(request("a")).await.unwrap();
        queue.dequeue().await.unwrap();

        let failed = queue.fail("a", "attestation failed").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.snapshot().failed_reason.as_deref(), Some("attestation failed"));

        match queue.enqueue(request("a")).await.unwrap() {
            Enqueued::Created(job) => {
                assert_eq!(job.status, JobStatus::Waiting);
                assert!(job.failed_reason.is_none());
            }
            other => panic!("expected re-enqueue, got {:?}", other),
        }
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_completed_job_stays_until_removed() {
        let queue = MemoryQueue::new();
        queue.enqueue(request("a")).await.unwrap();
        queue.dequeue().await.unwrap();
        queue.complete("a", result()).await.unwrap();

        let existing = queue.enqueue(request("a")).await.unwrap();
        match existing {
            Enqueued::Existing(job) => assert_eq!(job.status, JobStatus::Completed),
            other => panic!("expected existing job, got {:?}", other),
        }

        assert!(queue.remove("a").await.unwrap());
        assert!(queue.get("a").await.unwrap().is_none());
        assert!(!queue.remove("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_active_job_is_handed_out_again() {
        let queue = MemoryQueue::with_lease(Duration::ZERO);
        queue.enqueue(request("a")).await.unwrap();
        queue.enqueue(request("b")).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.id, "a");

        // "a" was never completed or failed, so it comes back before "b"
        let again = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(again.id, "a");
        assert_eq!(again.status, JobStatus::Active);

        queue.complete("a", result()).await.unwrap();
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_active_job_within_lease_is_not_reclaimed() {
        let queue = MemoryQueue::new();
        queue.enqueue(request("a")).await.unwrap();
        queue.dequeue().await.unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.get("a").await.unwrap().unwrap().status, JobStatus::Active);
    }

    #[tokio::test]
    async fn test_wait_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(MemoryQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.wait(Duration::from_secs(5)).await;
                queue.dequeue().await.unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(request("a")).await.unwrap();

        let job = waiter.await.unwrap();
        assert_eq!(job.map(|j| j.id), Some("a".to_string()));
    }
}
