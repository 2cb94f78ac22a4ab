//! Fixed pool of worker slots draining the job queue
//!
//! Each slot handles one job at a time. The slot count bounds how many
//! attestations run concurrently.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::DeploymentWorker;

/// How long an idle slot waits for new work before polling again
const IDLE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `slots` workers (at least one)
    pub fn start(worker: DeploymentWorker, slots: usize) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let slots = slots.max(1);

        let handles = (0..slots)
            .map(|slot| {
                let worker = worker.clone();
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(run_slot(slot, worker, shutdown_rx))
            })
            .collect();

        info!(slots, "Started worker pool");
        Self {
            shutdown_tx,
            handles,
        }
    }

    pub fn slots(&self) -> usize {
        self.handles.len()
    }

    /// Stop taking new jobs and wait for in-flight jobs to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker slot ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_slot(slot: usize, worker: DeploymentWorker, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match worker.queue.dequeue().await {
            Ok(Some(job)) => worker.handle(job).await,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = worker.queue.wait(IDLE_WAIT) => {}
                }
            }
            Err(e) => {
                error!(slot, error = %e, "Failed to dequeue job");
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(IDLE_WAIT) => {}
                }
            }
        }
    }
}
