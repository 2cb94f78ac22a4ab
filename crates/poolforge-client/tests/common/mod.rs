//! Shared test server setup

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use poolforge_client::{ClientError, JobApi, ResourceRequest};
use poolforge_core::{
    CreateJobResponse, DeployRequest, JobSnapshot, KeyPair, Permissions, SubscriptionEvent,
    WorkProver,
};
use poolforge_server::{
    AppState, FixedSlotClock, JobService, KeyRegistry, MemoryQueue, MemoryStore, NoopRefresher,
    ServiceError, SetupCache, WorkerPool,
};
use std::sync::Arc;

pub const NETWORK: &str = "net-1";

/// Bearer token the served router expects on admin routes
pub const ADMIN_TOKEN: &str = "admin-secret";

pub fn pool_request() -> ResourceRequest {
    ResourceRequest::pool("U1", NETWORK, "MINA", "TOK")
}

/// A job service with `signers` full-rights signers and a running worker pool
pub struct TestServer {
    pub service: Arc<JobService>,
    pub setup: Arc<SetupCache>,
    pub pool: WorkerPool,
}

impl TestServer {
    pub async fn start(signers: usize) -> Self {
        let service = Arc::new(JobService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryQueue::new()),
            Arc::new(KeyRegistry::new()),
            Arc::new(FixedSlotClock::new(0)),
            Arc::new(NoopRefresher),
        ));

        for _ in 0..signers {
            let key = KeyPair::generate();
            service.registry().insert_key(key.clone());
            let signer = service
                .register_signer(&key.public_key().to_base64())
                .await
                .unwrap();
            service
                .set_grant(signer.id, NETWORK, Permissions::FULL.bits())
                .await
                .unwrap();
        }

        let setup = Arc::new(SetupCache::new(Arc::new(WorkProver::new(16))));
        let pool = WorkerPool::start(service.worker(setup.clone()), 2);

        Self {
            service,
            setup,
            pool,
        }
    }

    pub fn api(&self) -> Arc<dyn JobApi> {
        Arc::new(InProcessApi {
            service: self.service.clone(),
        })
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            service: self.service.clone(),
            setup: self.setup.clone(),
            workers: self.pool.slots(),
            admin_token: Some(ADMIN_TOKEN.into()),
        })
    }
}

/// `JobApi` calling the service directly
pub struct InProcessApi {
    pub service: Arc<JobService>,
}

fn client_error(err: ServiceError) -> ClientError {
    match err {
        ServiceError::NotFound(msg) => ClientError::NotFound(msg),
        other => ClientError::Api {
            status: 500,
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl JobApi for InProcessApi {
    async fn create_job(&self, request: DeployRequest) -> poolforge_client::Result<CreateJobResponse> {
        self.service.create_job(request).await.map_err(client_error)
    }

    async fn status_job(&self, id: &str) -> poolforge_client::Result<JobSnapshot> {
        self.service.status_job(id).await.map_err(client_error)
    }

    async fn subscribe_job(
        &self,
        id: &str,
    ) -> poolforge_client::Result<BoxStream<'static, poolforge_client::Result<SubscriptionEvent>>> {
        let events = self.service.subscribe_job(id).await.map_err(client_error)?;
        Ok(events.map(Ok).boxed())
    }

    async fn confirm_job(&self, id: &str) -> poolforge_client::Result<String> {
        self.service.confirm_job(id).await.map_err(client_error)
    }
}
