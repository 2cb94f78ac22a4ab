//! Orchestrator driver
//!
//! Runs the state machine to a terminal state, executing each effect against
//! the job API, ledger, wallet and job-id store and feeding the outcome back
//! in as the next event.

use futures::StreamExt;
use poolforge_core::SubscriptionEvent;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::api::JobApi;
use crate::collaborators::{JobIdStore, Ledger, Wallet};
use crate::error::{ClientError, Result};
use crate::machine::{transition, Effect, Event, Machine, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::types::{InclusionStatus, ResourceRequest};

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub retry_delay: Duration,
    pub max_retries: usize,
    /// Give up on a subscription and poll status instead after this long
    pub subscription_timeout: Option<Duration>,
    /// Interval between ledger inclusion checks
    pub inclusion_poll_interval: Duration,
    pub inclusion_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            subscription_timeout: None,
            inclusion_poll_interval: Duration::from_secs(5),
            inclusion_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Drives one deployment request end to end
pub struct Orchestrator {
    api: Arc<dyn JobApi>,
    ledger: Arc<dyn Ledger>,
    wallet: Arc<dyn Wallet>,
    job_ids: Arc<dyn JobIdStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn JobApi>,
        ledger: Arc<dyn Ledger>,
        wallet: Arc<dyn Wallet>,
        job_ids: Arc<dyn JobIdStore>,
    ) -> Self {
        Self {
            api,
            ledger,
            wallet,
            job_ids,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run until the machine reaches a terminal state.
    ///
    /// A job id left in the store by an earlier run is resumed instead of
    /// creating a new job.
    pub async fn run(&self, request: &ResourceRequest) -> Result<Machine> {
        let job_id = self.job_ids.load()?;
        if let Some(id) = &job_id {
            info!(job_id = %id, "Resuming deployment");
        }

        let mut machine = Machine::new(job_id, self.config.max_retries, self.config.retry_delay);
        let mut events = VecDeque::from([Event::Start]);

        while let Some(event) = events.pop_front() {
            let from = machine.state;
            let (next, effects) = transition(machine, event);
            machine = next;
            if machine.state != from {
                debug!(from = %from, to = %machine.state, "Orchestrator transition");
            }

            for effect in effects {
                if let Some(event) = self.execute(effect, request).await? {
                    events.push_back(event);
                }
            }
        }

        if machine.state.is_terminal() {
            info!(state = %machine.state, job_id = ?machine.job_id, "Deployment finished");
        } else {
            warn!(state = %machine.state, "Orchestrator stalled");
        }
        Ok(machine)
    }

    /// Run one effect.
    ///
    /// Collaborator failures come back as `ActorFailed` events; only a broken
    /// job-id store aborts the run.
    async fn execute(&self, effect: Effect, request: &ResourceRequest) -> Result<Option<Event>> {
        let event = match effect {
            Effect::CheckExists => match self.ledger.resource_exists(request).await {
                Ok(exists) => Event::ExistenceChecked { exists },
                Err(e) => failed(e),
            },

            Effect::CreateJob { job_id } => {
                let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                match self.api.create_job(request.with_job_id(job_id)).await {
                    Ok(response) => {
                        info!(job_id = %response.id, status = ?response.status, "Created job");
                        Event::JobCreated {
                            id: response.id,
                            status: response.status,
                        }
                    }
                    Err(e) => failed(e),
                }
            }

            Effect::PersistJobId(job_id) => {
                self.job_ids.save(&job_id)?;
                return Ok(None);
            }

            Effect::ClearJobId => {
                self.job_ids.clear()?;
                return Ok(None);
            }

            Effect::FetchStatus { job_id } => match self.api.status_job(&job_id).await {
                Ok(snapshot) => Event::StatusReceived(snapshot),
                Err(ClientError::NotFound(_)) => Event::JobNotFound,
                Err(e) => failed(e),
            },

            Effect::Subscribe { job_id } => self.await_terminal_event(&job_id).await,

            Effect::Sign { transaction_payload } => match self.sign(&transaction_payload).await {
                Ok(hash) => Event::TransactionIncluded { hash },
                Err(e) => failed(e),
            },

            Effect::Confirm { job_id } => match self.api.confirm_job(&job_id).await {
                Ok(message) => {
                    info!(job_id = %job_id, message = %message, "Confirmed job");
                    Event::Confirmed { message }
                }
                Err(e) => failed(e),
            },

            Effect::Sleep(delay) => {
                sleep(delay).await;
                Event::RetryElapsed
            }
        };
        Ok(Some(event))
    }

    /// First terminal event of a job subscription
    async fn await_terminal_event(&self, job_id: &str) -> Event {
        let mut events = match self.api.subscribe_job(job_id).await {
            Ok(events) => events,
            Err(ClientError::NotFound(_)) => return Event::JobNotFound,
            Err(e) => return failed(e),
        };

        let next = match self.config.subscription_timeout {
            Some(limit) => match timeout(limit, events.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(job_id = %job_id, "No job event before timeout, polling status");
                    return Event::SubscriptionTimedOut;
                }
            },
            None => events.next().await,
        };

        match next {
            Some(Ok(SubscriptionEvent::Completed(snapshot))) => {
                match (snapshot.resource_public_key, snapshot.transaction_payload) {
                    (Some(resource_public_key), Some(transaction_payload)) => Event::ProofReady {
                        resource_public_key,
                        transaction_payload,
                    },
                    _ => failed(ClientError::Stream(format!(
                        "Job {} completed without a result",
                        job_id
                    ))),
                }
            }
            Some(Ok(SubscriptionEvent::Failed(snapshot))) => Event::JobFailed {
                reason: snapshot
                    .failed_reason
                    .unwrap_or_else(|| format!("Job {} failed", job_id)),
            },
            Some(Ok(SubscriptionEvent::NotFound { .. })) => Event::JobNotFound,
            Some(Err(e)) => failed(e),
            None => failed(ClientError::Stream(format!(
                "Subscription to job {} closed without an event",
                job_id
            ))),
        }
    }

    /// Sign with the wallet, then wait for the ledger to include the transaction
    async fn sign(&self, transaction_payload: &str) -> Result<String> {
        let hash = self.wallet.sign_and_send(transaction_payload).await?;
        info!(hash = %hash, "Transaction submitted");

        let deadline = Instant::now() + self.config.inclusion_timeout;
        loop {
            match self.ledger.inclusion_status(&hash).await? {
                InclusionStatus::Included => return Ok(hash),
                InclusionStatus::Rejected { reason } => {
                    return Err(ClientError::Ledger(format!("Transaction {} rejected: {}", hash, reason)))
                }
                InclusionStatus::Pending if Instant::now() >= deadline => {
                    return Err(ClientError::Timeout(format!("Transaction {} not included", hash)))
                }
                InclusionStatus::Pending => sleep(self.config.inclusion_poll_interval).await,
            }
        }
    }
}

fn failed(error: ClientError) -> Event {
    warn!(error = %error, "Orchestrator step failed");
    Event::ActorFailed {
        error: error.to_string(),
    }
}
