//! Per-job event bus
//!
//! Each job id gets its own broadcast channel, created by the first
//! subscriber and torn down when the last subscription is dropped.
//! Publishing to a job nobody listens to is a no-op.

use poolforge_core::JobSnapshot;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 16;

type Channels = Arc<Mutex<HashMap<String, broadcast::Sender<JobSnapshot>>>>;

/// Broadcast hub for job lifecycle snapshots
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    channels: Channels,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a snapshot to every current subscriber of its job
    pub fn publish(&self, snapshot: JobSnapshot) {
        let channels = self.channels.lock().unwrap();
        if let Some(sender) = channels.get(&snapshot.id) {
            debug!(
                job_id = %snapshot.id,
                status = snapshot.status.as_str(),
                listeners = sender.receiver_count(),
                "Publishing job event"
            );
            let _ = sender.send(snapshot);
        }
    }

    /// Register interest in a job's events
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        let mut channels = self.channels.lock().unwrap();
        let receiver = channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        Subscription {
            job_id: job_id.to_string(),
            receiver,
            channels: self.channels.clone(),
        }
    }

    /// Number of live subscriptions for a job
    pub fn listener_count(&self, job_id: &str) -> usize {
        let channels = self.channels.lock().unwrap();
        channels
            .get(job_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of jobs with at least one subscriber
    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }
}

/// A live registration on the bus; deregisters on drop
#[derive(Debug)]
pub struct Subscription {
    job_id: String,
    receiver: broadcast::Receiver<JobSnapshot>,
    channels: Channels,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn recv(&mut self) -> Result<JobSnapshot, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut channels = match self.channels.lock() {
            Ok(channels) => channels,
            Err(poisoned) => poisoned.into_inner(),
        };
        // This subscription's receiver is still counted
        let last = channels
            .get(&self.job_id)
            .map(|sender| sender.receiver_count() <= 1)
            .unwrap_or(false);
        if last {
            channels.remove(&self.job_id);
            debug!(job_id = %self.job_id, "Removed job event channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolforge_core::JobStatus;

    fn snapshot(id: &str, status: JobStatus) -> JobSnapshot {
        JobSnapshot {
            id: id.into(),
            status,
            resource_public_key: None,
            transaction_payload: None,
            failed_reason: None,
        }
    }

    #[tokio::test]
    async fn test_events_are_filtered_by_job() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("a");
        let _b = bus.subscribe("b");

        bus.publish(snapshot("b", JobStatus::Completed));
        bus.publish(snapshot("a", JobStatus::Failed));

        let received = a.recv().await.unwrap();
        assert_eq!(received.id, "a");
        assert_eq!(received.status, JobStatus::Failed);
    }

    #[test]
    fn test_channel_torn_down_after_last_subscriber() {
        let bus = EventBus::new();
        let first = bus.subscribe("a");
        let second = bus.subscribe("a");
        assert_eq!(bus.listener_count("a"), 2);

        drop(first);
        assert_eq!(bus.listener_count("a"), 1);
        assert_eq!(bus.channel_count(), 1);

        drop(second);
        assert_eq!(bus.listener_count("a"), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish(snapshot("a", JobStatus::Completed));
        assert_eq!(bus.channel_count(), 0);
    }
}
