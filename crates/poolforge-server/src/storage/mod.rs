//! Storage abstraction for signers, grants, resources and custody shares
//!
//! This module provides a trait-based abstraction for persistent state,
//! with an in-memory backend (default) and a PostgreSQL backend behind the
//! `postgres` feature.
//!
//! A resource row and its key shares are always written together: either
//! both land or neither does. The unique constraints on a resource's public
//! key and job id make a duplicate completion a detectable no-op.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poolforge_core::{
    JobResult, KeyShare, Permissions, PublicKey, ResourceKind, ResourceParams, ResourceStatus,
};
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// An operator allowed to authorize deployments and hold custody shares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerRecord {
    pub id: i64,
    pub public_key: PublicKey,
    pub created_at: DateTime<Utc>,
}

/// A signer's permissions on one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRecord {
    pub signer_id: i64,
    pub network: String,
    pub permissions: Permissions,
    pub active: bool,
}

/// A deployed resource awaiting or past client confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub id: i64,
    pub kind: ResourceKind,
    pub public_key: PublicKey,
    pub requester: String,
    pub job_id: String,
    pub status: ResourceStatus,
    pub network: String,
    pub params: ResourceParams,
    pub transaction_payload: String,
    pub created_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn job_result(&self) -> JobResult {
        JobResult {
            resource_public_key: self.public_key.to_base64(),
            transaction_payload: self.transaction_payload.clone(),
        }
    }
}

/// Resource row as produced by the worker
#[derive(Debug, Clone)]
pub struct NewResource {
    pub kind: ResourceKind,
    pub public_key: PublicKey,
    pub requester: String,
    pub job_id: String,
    pub network: String,
    pub params: ResourceParams,
    pub transaction_payload: String,
}

/// Result of confirming a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The resource moved from pending to confirmed
    Confirmed(ResourceRecord),
    /// The resource was already confirmed; nothing changed
    AlreadyConfirmed(ResourceRecord),
}

/// Stored multisig approval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigRecord {
    pub id: i64,
    pub signer_id: i64,
    pub signature: String,
    /// JSON of the signed approval
    pub data: String,
    pub network: String,
    pub deadline_slot: u64,
    pub created_at: DateTime<Utc>,
}

/// Multisig approval before it is stored
#[derive(Debug, Clone)]
pub struct NewMultisig {
    pub signer_id: i64,
    pub signature: String,
    pub data: String,
    pub network: String,
    pub deadline_slot: u64,
}

/// Storage backend trait
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait Store: Send + Sync + Debug {
    // =========================================================================
    // Signers and grants
    // =========================================================================

    /// Create a signer; fails with `AlreadyExists` on a duplicate public key
    async fn create_signer(&self, public_key: PublicKey) -> Result<SignerRecord, StorageError>;

    async fn get_signer(&self, id: i64) -> Result<Option<SignerRecord>, StorageError>;

    async fn find_signer(&self, public_key: &PublicKey) -> Result<Option<SignerRecord>, StorageError>;

    /// Insert or replace a signer's grant on a network
    async fn upsert_grant(&self, grant: GrantRecord) -> Result<GrantRecord, StorageError>;

    /// Flip a grant's active flag; returns false if there is no such grant
    async fn set_grant_active(
        &self,
        signer_id: i64,
        network: &str,
        active: bool,
    ) -> Result<bool, StorageError>;

    /// Active grants on a network, with their signers
    async fn active_grants(
        &self,
        network: &str,
    ) -> Result<Vec<(SignerRecord, GrantRecord)>, StorageError>;

    // =========================================================================
    // Resources and custody shares
    // =========================================================================

    async fn resource_key_exists(&self, public_key: &PublicKey) -> Result<bool, StorageError>;

    /// Persist a resource and all of its key shares atomically.
    ///
    /// Fails with `AlreadyExists` if the public key or job id is taken, in
    /// which case nothing is written.
    async fn insert_resource_with_shares(
        &self,
        resource: NewResource,
        shares: Vec<KeyShare>,
    ) -> Result<ResourceRecord, StorageError>;

    async fn resource_by_job(&self, job_id: &str) -> Result<Option<ResourceRecord>, StorageError>;

    /// Mark the resource for a job confirmed
    async fn confirm_resource(&self, job_id: &str) -> Result<ConfirmOutcome, StorageError>;

    async fn key_shares(&self, resource_id: i64) -> Result<Vec<KeyShare>, StorageError>;

    // =========================================================================
    // Multisig approvals
    // =========================================================================

    async fn append_multisig(&self, record: NewMultisig) -> Result<MultisigRecord, StorageError>;

    /// Approvals on a network whose deadline is at or after `slot`
    async fn live_multisig(&self, network: &str, slot: u64)
        -> Result<Vec<MultisigRecord>, StorageError>;
}
