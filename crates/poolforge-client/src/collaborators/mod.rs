//! External collaborators driven by the orchestrator
//!
//! The ledger, the user's wallet and the job-id persistence all live outside
//! this crate; the orchestrator only sees these traits.

pub mod memory;
pub mod mock;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{InclusionStatus, ResourceRequest};

pub use memory::{FileJobIdStore, MemoryJobIdStore};
pub use mock::{MockLedger, MockWallet};

/// Read access to the target ledger
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Whether a resource matching the request is already deployed
    async fn resource_exists(&self, request: &ResourceRequest) -> Result<bool>;

    async fn inclusion_status(&self, transaction_hash: &str) -> Result<InclusionStatus>;
}

/// The user's wallet
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Sign and submit an opaque transaction payload, returning its hash
    async fn sign_and_send(&self, transaction_payload: &str) -> Result<String>;
}

/// Persistence of the in-flight job id across client restarts
pub trait JobIdStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;

    fn save(&self, job_id: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;
}
