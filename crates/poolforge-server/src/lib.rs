//! Poolforge Server
//!
//! Accepts pool and factory deployment requests, runs them through a worker
//! pool and reports results to callers:
//! - Authorizes each deployment against the network's signer tree
//! - Generates the resource key and splits it across full-rights signers
//! - Signs and attests the deployment transaction for the wallet
//!
//! ## API Endpoints
//!
//! ### Jobs
//! - `POST /v1/pools` - Enqueue a pool deployment
//! - `POST /v1/factories` - Enqueue a factory deployment
//! - `GET /v1/jobs/{id}` - Job status
//! - `GET /v1/jobs/{id}/events` - Terminal job event as Server-Sent Events
//! - `POST /v1/jobs/{id}/confirm` - Mark the resource deployed
//! - `POST /v1/multisig` - Sign an upgrade approval
//!
//! ### Administration
//! - `POST /v1/signers` - Register a signer
//! - `PUT /v1/signers/{id}/grants/{network}` - Set permissions
//! - `DELETE /v1/signers/{id}/grants/{network}` - Deactivate permissions
//! - `GET /v1/networks/{network}/authorization` - Tree root and members
//! - `GET /health`, `GET /ready`

pub mod api;
pub mod cdn;
pub mod config;
pub mod core;
pub mod events;
pub mod keys;
pub mod ledger;
pub mod queue;
pub mod service;
pub mod storage;
pub mod worker;

pub use api::create_router;
pub use api::handlers::AppState;
pub use cdn::{HttpManifestRefresher, ManifestRefresher, NoopRefresher};
pub use config::ServerConfig;
pub use core::SetupCache;
pub use events::EventBus;
pub use keys::KeyRegistry;
pub use ledger::{FixedSlotClock, GenesisSlotClock, SlotClock};
pub use queue::{JobQueue, MemoryQueue};
pub use service::{JobService, ServiceError};
pub use storage::{MemoryStore, Store};
pub use worker::{DeploymentWorker, WorkerPool};
