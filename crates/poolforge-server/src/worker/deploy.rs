//! Building, signing and attesting one deployment
//!
//! Steps per job:
//! 1. Return the stored result if the job's resource already exists
//! 2. Load the proving key for the network class
//! 3. Build the network's authorization tree and require two custodians
//! 4. Generate a fresh resource key, retrying on public-key collision
//! 5. Sign with the resource key and the authorizing signer
//! 6. Attest the signed transaction
//! 7. Persist the resource and its custody shares in one transaction
//!
//! Nothing is persisted until the attested transaction exists.

use poolforge_core::{
    split_secret, CoreError, DeploymentTransaction, JobResult, KeyPair, NetworkClass,
    SignedApproval, UnsignedDeployment, MIN_CUSTODIANS,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::{AuthorizationService, NetworkAuthorization, SetupCache};
use crate::events::EventBus;
use crate::keys::KeyRegistry;
use crate::ledger::SlotClock;
use crate::queue::{JobQueue, JobRecord};
use crate::service::ServiceError;
use crate::storage::{NewResource, StorageError, Store};

/// Attempts at generating a resource key that is not already in storage
pub const KEYGEN_ATTEMPTS: usize = 5;

/// Attempts at storing a job's outcome before leaving it to the lease
pub const OUTCOME_ATTEMPTS: usize = 3;

const OUTCOME_BACKOFF: Duration = Duration::from_millis(50);

/// Executes deployment jobs taken from the queue
#[derive(Debug, Clone)]
pub struct DeploymentWorker {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) events: EventBus,
    pub(crate) authorization: Arc<AuthorizationService>,
    pub(crate) setup: Arc<SetupCache>,
    pub(crate) registry: Arc<KeyRegistry>,
    pub(crate) clock: Arc<dyn SlotClock>,
}

impl DeploymentWorker {
    /// Run one dequeued job to completion or failure and broadcast the outcome
    pub async fn handle(&self, job: JobRecord) {
        info!(job_id = %job.id, kind = %job.kind, network = %job.payload.network, "Processing job");

        let outcome = match self.process(&job).await {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Job failed");
                Err(err.to_string())
            }
        };

        match self.record_outcome(&job.id, &outcome).await {
            Ok(record) => {
                info!(job_id = %record.id, status = record.status.as_str(), "Job finished");
                self.events.publish(record.snapshot());
            }
            Err(err) => {
                error!(
                    job_id = %job.id,
                    error = %err,
                    "Could not record job outcome, job stays active until its lease expires"
                );
            }
        }
    }

    /// Store the outcome, retrying storage failures with a linear backoff
    async fn record_outcome(
        &self,
        job_id: &str,
        outcome: &Result<JobResult, String>,
    ) -> Result<JobRecord, StorageError> {
        let mut attempt = 1;
        loop {
            let recorded = match outcome {
                Ok(result) => self.queue.complete(job_id, result.clone()).await,
                Err(reason) => self.queue.fail(job_id, reason).await,
            };
            match recorded {
                Ok(record) => return Ok(record),
                Err(err @ StorageError::NotFound(_)) => return Err(err),
                Err(err) if attempt >= OUTCOME_ATTEMPTS => return Err(err),
                Err(err) => {
                    warn!(job_id = %job_id, attempt, error = %err, "Retrying job outcome");
                    tokio::time::sleep(OUTCOME_BACKOFF * attempt as u32).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Produce the deployment for a job
    pub async fn process(&self, job: &JobRecord) -> Result<JobResult, ServiceError> {
        let request = &job.payload;
        request.validate()?;

        if let Some(existing) = self.store.resource_by_job(&job.id).await? {
            info!(job_id = %job.id, "Resource already deployed for job");
            return Ok(existing.job_result());
        }

        let class = NetworkClass::of(&request.network);
        let proving_key = self.setup.proving_key(class).await?;

        let auth = self.authorization.for_network(&request.network).await?;
        let custodians = auth.custodians();
        if custodians.len() < MIN_CUSTODIANS {
            warn!(
                network = %request.network,
                found = custodians.len(),
                "Rejecting deployment without a custody quorum"
            );
            return Err(CoreError::InsufficientQuorum {
                required: MIN_CUSTODIANS,
                found: custodians.len(),
            }
            .into());
        }

        let authorizer = self.select_authorizer(&auth)?;
        let resource_key = self.generate_resource_key().await?;
        let witness = auth.tree.witness(&authorizer.public_key())?;
        let approvals = self.live_approvals(&auth).await?;

        let unsigned = UnsignedDeployment {
            kind: request.kind(),
            network: request.network.clone(),
            requester: request.requester.clone(),
            resource_public_key: resource_key.public_key(),
            params: request.params.clone(),
            auth_root: auth.tree.root_base64(),
            authorizer: authorizer.public_key(),
            witness,
            approvals,
        };
        let signed = unsigned.sign(&resource_key, &authorizer)?;

        let prover = self.setup.prover();
        let attested: DeploymentTransaction =
            tokio::task::spawn_blocking(move || signed.attest(prover.as_ref(), &proving_key))
                .await
                .map_err(|e| ServiceError::Infrastructure(format!("Attestation task failed: {}", e)))??;
        debug!(job_id = %job.id, "Attested deployment");

        let shares = split_secret(&resource_key.secret_bytes(), &custodians)?;
        let resource = NewResource {
            kind: request.kind(),
            public_key: resource_key.public_key(),
            requester: request.requester.clone(),
            job_id: job.id.clone(),
            network: request.network.clone(),
            params: request.params.clone(),
            transaction_payload: attested.to_payload()?,
        };

        match self.store.insert_resource_with_shares(resource, shares).await {
            Ok(record) => Ok(record.job_result()),
            Err(StorageError::AlreadyExists(what)) => {
                // Another delivery of the same job got there first
                match self.store.resource_by_job(&job.id).await? {
                    Some(existing) => Ok(existing.job_result()),
                    None => Err(ServiceError::Conflict(format!("Resource already exists: {}", what))),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Pinned authorizer if set, else the first custodian whose key is held
    fn select_authorizer(&self, auth: &NetworkAuthorization) -> Result<Arc<KeyPair>, ServiceError> {
        let public_key = match self.registry.authorizer_for(&auth.network) {
            Some(pinned) => {
                let full = auth.signer(&pinned).map(|s| s.permissions.is_full()).unwrap_or(false);
                if !full {
                    warn!(network = %auth.network, signer = %pinned, "Pinned authorizer lacks full rights");
                    return Err(ServiceError::Authorization(format!(
                        "Authorizer {} is not a full-rights signer on {}",
                        pinned, auth.network
                    )));
                }
                pinned
            }
            None => auth
                .custodians()
                .into_iter()
                .map(|c| c.public_key)
                .find(|pk| self.registry.holds(pk))
                .ok_or_else(|| {
                    ServiceError::Authorization(format!(
                        "No authorizing signer key held for {}",
                        auth.network
                    ))
                })?,
        };

        self.registry.signing_key(&public_key).ok_or_else(|| {
            ServiceError::Authorization(format!("Signing key for {} is not held", public_key))
        })
    }

    async fn generate_resource_key(&self) -> Result<KeyPair, ServiceError> {
        for attempt in 1..=KEYGEN_ATTEMPTS {
            let key = KeyPair::generate();
            if !self.store.resource_key_exists(&key.public_key()).await? {
                return Ok(key);
            }
            warn!(attempt, "Generated resource key already exists, retrying");
        }
        Err(ServiceError::Infrastructure(format!(
            "No unused resource key after {} attempts",
            KEYGEN_ATTEMPTS
        )))
    }

    /// Unexpired approvals signed by full-rights signers of the network
    async fn live_approvals(
        &self,
        auth: &NetworkAuthorization,
    ) -> Result<Vec<SignedApproval>, ServiceError> {
        let slot = self.clock.current_slot();
        let records = self.store.live_multisig(&auth.network, slot).await?;

        let mut approvals = Vec::new();
        for record in records {
            let approval: SignedApproval = match serde_json::from_str(&record.data) {
                Ok(approval) => approval,
                Err(e) => {
                    warn!(multisig_id = record.id, error = %e, "Skipping unreadable approval");
                    continue;
                }
            };
            let eligible = auth
                .signer(&approval.signer)
                .map(|s| s.permissions.is_full())
                .unwrap_or(false);
            if eligible && approval.approval.is_live_at(slot) && approval.verify().is_ok() {
                approvals.push(approval);
            } else {
                debug!(multisig_id = record.id, "Skipping ineligible approval");
            }
        }
        Ok(approvals)
    }
}
