//! # Poolforge Core
//!
//! Primitives for authorizing and building custodial pool and factory
//! deployments.
//!
//! ## Key Concepts
//!
//! - **Authorization tree**: sparse Merkle map from `H(signer key)` to
//!   `H(permission bitmask)`; its root is checked on-ledger
//! - **Custody shares**: the resource key, layered-encrypted to every pair of
//!   full-rights signers so that any two can recover it and no one alone can
//! - **Deployment transaction**: body signed by the resource and authorizing
//!   signer, then attested
//! - **Attestation**: the expensive proof that must accompany a transaction
//!   before ledger submission

pub mod attestation;
pub mod auth_tree;
pub mod crypto;
pub mod custody;
pub mod error;
pub mod multisig;
pub mod transaction;
pub mod types;

pub use attestation::{Attestation, Prover, ProvingKey, WorkProver};
pub use auth_tree::{AuthorizationTree, TreeWitness};
pub use crypto::{KeyPair, PublicKey};
pub use custody::{recover_secret, split_secret, Custodian, KeyShare, MIN_CUSTODIANS};
pub use error::{CoreError, Result};
pub use multisig::{SignedApproval, UpgradeApproval};
pub use transaction::{DeploymentTransaction, UnsignedDeployment};
pub use types::{
    CreateJobResponse, CreateStatus, DeployRequest, JobResult, JobSnapshot, JobStatus,
    NetworkClass, Permissions, ResourceKind, ResourceParams, ResourceStatus, SubscriptionEvent,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
