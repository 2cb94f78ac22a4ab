//! Job API operations
//!
//! `JobService` is the transport-independent surface behind the HTTP
//! handlers: job creation, status, subscription and confirmation, plus the
//! multisig and signer administration operations.

use base64::{engine::general_purpose::STANDARD, Engine};
use futures::stream::{self, BoxStream, StreamExt};
use poolforge_core::{
    CoreError, CreateJobResponse, CreateStatus, DeployRequest, JobSnapshot, JobStatus,
    Permissions, PublicKey, SubscriptionEvent, TreeWitness, UpgradeApproval,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::cdn::ManifestRefresher;
use crate::core::{AuthorizationService, NetworkAuthorization, SetupCache};
use crate::events::{EventBus, Subscription};
use crate::keys::KeyRegistry;
use crate::ledger::SlotClock;
use crate::queue::{Enqueued, JobQueue};
use crate::storage::{
    ConfirmOutcome, GrantRecord, NewMultisig, SignerRecord, StorageError, Store,
};
use crate::worker::DeploymentWorker;

/// Error kinds surfaced by the job API
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(_) | CoreError::InsufficientQuorum { .. } => {
                ServiceError::Validation(err.to_string())
            }
            CoreError::Authorization(_) => ServiceError::Authorization(err.to_string()),
            CoreError::NotFound(msg) => ServiceError::NotFound(msg),
            CoreError::Crypto(_) | CoreError::Serialization(_) => {
                ServiceError::Infrastructure(err.to_string())
            }
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => ServiceError::NotFound(msg),
            StorageError::AlreadyExists(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Infrastructure(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Infrastructure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Input of createMultisigSignature
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigRequest {
    /// Public key of the approving signer
    pub user: String,
    pub approved_upgrader: String,
    pub message_hash: String,
    pub deadline_slot: u64,
    pub network: String,
}

/// Output of createMultisigSignature
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigResponse {
    /// Base64 JSON of the signed approval
    pub transaction_payload: String,
    pub witness: TreeWitness,
    pub signature: String,
    pub rights: Vec<String>,
}

/// Job API backed by a queue, a store and the event bus
#[derive(Debug, Clone)]
pub struct JobService {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    events: EventBus,
    authorization: Arc<AuthorizationService>,
    registry: Arc<KeyRegistry>,
    clock: Arc<dyn SlotClock>,
    refresher: Arc<dyn ManifestRefresher>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        registry: Arc<KeyRegistry>,
        clock: Arc<dyn SlotClock>,
        refresher: Arc<dyn ManifestRefresher>,
    ) -> Self {
        Self {
            authorization: Arc::new(AuthorizationService::new(store.clone())),
            events: EventBus::new(),
            store,
            queue,
            registry,
            clock,
            refresher,
        }
    }

    /// Worker sharing this service's store, queue, bus and caches
    pub fn worker(&self, setup: Arc<SetupCache>) -> DeploymentWorker {
        DeploymentWorker {
            store: self.store.clone(),
            queue: self.queue.clone(),
            events: self.events.clone(),
            authorization: self.authorization.clone(),
            setup,
            registry: self.registry.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    pub async fn queue_depth(&self) -> Result<usize> {
        Ok(self.queue.depth().await?)
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Enqueue a deployment unless a job or resource for its id already exists
    pub async fn create_job(&self, request: DeployRequest) -> Result<CreateJobResponse> {
        request.validate()?;
        let id = request.job_id.clone();

        if self.queue.get(&id).await?.is_none() && self.store.resource_by_job(&id).await?.is_some() {
            debug!(job_id = %id, "Job already confirmed");
            return Ok(CreateJobResponse {
                id,
                status: CreateStatus::Completed,
            });
        }

        let status = match self.queue.enqueue(request).await? {
            Enqueued::Created(job) => {
                info!(job_id = %job.id, kind = %job.kind, "Enqueued job");
                self.events.publish(job.snapshot());
                CreateStatus::Created
            }
            Enqueued::Existing(job) if job.status == JobStatus::Completed => CreateStatus::Completed,
            Enqueued::Existing(_) => CreateStatus::Exists,
        };

        Ok(CreateJobResponse { id, status })
    }

    /// Current snapshot of a job, falling back to its stored resource
    pub async fn status_job(&self, id: &str) -> Result<JobSnapshot> {
        lookup(self.queue.as_ref(), self.store.as_ref(), id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Job {} not found", id)))
    }

    /// Stream of terminal events for a job.
    ///
    /// A finished job yields one event and closes. An unknown id yields a
    /// single `NotFound` event. Dropping the stream deregisters it from the
    /// event bus.
    pub async fn subscribe_job(&self, id: &str) -> Result<BoxStream<'static, SubscriptionEvent>> {
        // Register before reading the snapshot so no completion is missed
        let subscription = self.events.subscribe(id);

        match lookup(self.queue.as_ref(), self.store.as_ref(), id).await? {
            None => {
                drop(subscription);
                debug!(job_id = %id, "Subscription to unknown job");
                Ok(stream::iter([SubscriptionEvent::NotFound {
                    job_id: id.to_string(),
                }])
                .boxed())
            }
            Some(snapshot) if snapshot.status.is_terminal() => {
                drop(subscription);
                Ok(stream::iter(SubscriptionEvent::from_snapshot(snapshot)).boxed())
            }
            Some(_) => Ok(self.follow(subscription)),
        }
    }

    fn follow(&self, subscription: Subscription) -> BoxStream<'static, SubscriptionEvent> {
        let state = Follow {
            subscription,
            queue: self.queue.clone(),
            store: self.store.clone(),
        };

        stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            loop {
                match state.subscription.recv().await {
                    Ok(snapshot) => {
                        if let Some(event) = SubscriptionEvent::from_snapshot(snapshot) {
                            return Some((event, None));
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        let id = state.subscription.job_id().to_string();
                        debug!(job_id = %id, skipped, "Subscription lagged, re-reading job");
                        match lookup(state.queue.as_ref(), state.store.as_ref(), &id).await {
                            Ok(Some(snapshot)) => {
                                if let Some(event) = SubscriptionEvent::from_snapshot(snapshot) {
                                    return Some((event, None));
                                }
                            }
                            Ok(None) => return Some((SubscriptionEvent::NotFound { job_id: id }, None)),
                            Err(e) => warn!(job_id = %id, error = %e, "Job lookup failed"),
                        }
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    /// Mark a completed job's resource confirmed and drop the job
    pub async fn confirm_job(&self, id: &str) -> Result<String> {
        if let Some(job) = self.queue.get(id).await? {
            if job.status != JobStatus::Completed {
                return Err(ServiceError::Conflict(format!(
                    "Job {} is {}, not completed",
                    id,
                    job.status.as_str()
                )));
            }
        }

        let outcome = self.store.confirm_resource(id).await.map_err(|e| match e {
            StorageError::NotFound(_) => ServiceError::NotFound(format!("Job {} not found", id)),
            other => other.into(),
        })?;
        self.queue.remove(id).await?;

        match outcome {
            ConfirmOutcome::Confirmed(resource) => {
                info!(job_id = %id, resource = %resource.public_key, "Confirmed deployment");

                let refresher = self.refresher.clone();
                let network = resource.network.clone();
                let key = resource.public_key.to_base64();
                tokio::spawn(async move {
                    if let Err(e) = refresher.refresh(&network, &key).await {
                        warn!(network = %network, resource = %key, error = %e, "Manifest refresh failed");
                    }
                });

                Ok(format!(
                    "{} {} confirmed for job {}",
                    resource.kind, resource.public_key, id
                ))
            }
            ConfirmOutcome::AlreadyConfirmed(resource) => Ok(format!(
                "{} {} for job {} was already confirmed",
                resource.kind, resource.public_key, id
            )),
        }
    }

    // =========================================================================
    // Multisig approvals
    // =========================================================================

    /// Sign an upgrade approval with a held signer key and record it
    pub async fn create_multisig_signature(&self, request: MultisigRequest) -> Result<MultisigResponse> {
        if i64::try_from(request.deadline_slot).is_err() {
            return Err(ServiceError::Validation(format!(
                "deadlineSlot {} is out of range",
                request.deadline_slot
            )));
        }
        let user = PublicKey::from_base64(&request.user)?;
        let upgrader = PublicKey::from_base64(&request.approved_upgrader)?;
        let approval = UpgradeApproval::new(
            request.network.clone(),
            upgrader,
            request.message_hash,
            request.deadline_slot,
        )?;

        let slot = self.clock.current_slot();
        if !approval.is_live_at(slot) {
            return Err(ServiceError::Validation(format!(
                "deadlineSlot {} has already passed (current slot {})",
                request.deadline_slot, slot
            )));
        }

        let auth = self.authorization.for_network(&request.network).await?;
        let signer = auth.signer(&user).ok_or_else(|| {
            ServiceError::Authorization(format!("{} is not an active signer on {}", user, request.network))
        })?;
        if !signer.permissions.contains(Permissions::APPROVE_UPGRADE) {
            warn!(signer = %user, network = %request.network, "Signer may not approve upgrades");
            return Err(ServiceError::Authorization(format!(
                "{} may not approve upgrades on {}",
                user, request.network
            )));
        }
        let key = self
            .registry
            .signing_key(&user)
            .ok_or_else(|| ServiceError::Authorization(format!("Signing key for {} is not held", user)))?;

        let signed = approval.sign(&key)?;
        let witness = auth.tree.witness(&user)?;
        let data = serde_json::to_string(&signed)?;

        let record = self
            .store
            .append_multisig(NewMultisig {
                signer_id: signer.signer.id,
                signature: signed.signature.clone(),
                data: data.clone(),
                network: request.network.clone(),
                deadline_slot: request.deadline_slot,
            })
            .await?;
        info!(multisig_id = record.id, signer = %user, network = %request.network, "Recorded upgrade approval");

        Ok(MultisigResponse {
            transaction_payload: STANDARD.encode(data.as_bytes()),
            witness,
            signature: signed.signature,
            rights: signer.permissions.names().into_iter().map(String::from).collect(),
        })
    }

    // =========================================================================
    // Signer administration
    // =========================================================================

    pub async fn register_signer(&self, public_key: &str) -> Result<SignerRecord> {
        let public_key = PublicKey::from_base64(public_key)?;
        Ok(self.store.create_signer(public_key).await?)
    }

    /// Insert or replace a signer's grant and drop the cached tree
    pub async fn set_grant(&self, signer_id: i64, network: &str, permissions: u16) -> Result<GrantRecord> {
        if permissions & !Permissions::FULL.bits() != 0 {
            return Err(ServiceError::Validation(format!(
                "Unknown permission bits in {:#06b}",
                permissions
            )));
        }
        if network.trim().is_empty() {
            return Err(ServiceError::Validation("network cannot be empty".into()));
        }

        let grant = self
            .store
            .upsert_grant(GrantRecord {
                signer_id,
                network: network.to_string(),
                permissions: Permissions(permissions),
                active: true,
            })
            .await?;
        self.authorization.invalidate(network).await;
        Ok(grant)
    }

    /// Deactivate a signer's grant on a network
    pub async fn deactivate_grant(&self, signer_id: i64, network: &str) -> Result<()> {
        if !self.store.set_grant_active(signer_id, network, false).await? {
            return Err(ServiceError::NotFound(format!(
                "Signer {} has no grant on {}",
                signer_id, network
            )));
        }
        self.authorization.invalidate(network).await;
        info!(signer_id, network = %network, "Deactivated grant");
        Ok(())
    }

    pub async fn network_authorization(&self, network: &str) -> Result<Arc<NetworkAuthorization>> {
        Ok(self.authorization.for_network(network).await?)
    }
}

struct Follow {
    subscription: Subscription,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn Store>,
}

/// Snapshot from the queue, or from the resource row once the job is gone
async fn lookup(queue: &dyn JobQueue, store: &dyn Store, id: &str) -> Result<Option<JobSnapshot>> {
    if let Some(job) = queue.get(id).await? {
        return Ok(Some(job.snapshot()));
    }

    Ok(store.resource_by_job(id).await?.map(|resource| {
        let result = resource.job_result();
        JobSnapshot {
            id: id.to_string(),
            status: JobStatus::Completed,
            resource_public_key: Some(result.resource_public_key),
            transaction_payload: Some(result.transaction_payload),
            failed_reason: None,
        }
    }))
}
