//! Common types shared by the server and the client

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Maximum length accepted for free-form identifiers (job ids, tokens, networks)
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Permission bitmask carried by a signer's grant on a network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(pub u16);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const DEPLOY_POOL: Permissions = Permissions(1 << 0);
    pub const DEPLOY_FACTORY: Permissions = Permissions(1 << 1);
    pub const UPDATE_VERIFICATION_KEY: Permissions = Permissions(1 << 2);
    pub const UPDATE_SIGNERS: Permissions = Permissions(1 << 3);
    pub const APPROVE_UPGRADE: Permissions = Permissions(1 << 4);
    pub const PAUSE: Permissions = Permissions(1 << 5);

    /// Every defined right. Holders are "full-rights" signers.
    pub const FULL: Permissions = Permissions(0b11_1111);

    /// Raw bitmask
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether this grant carries every defined right
    pub fn is_full(self) -> bool {
        self.contains(Self::FULL)
    }

    /// Bitwise union
    pub fn union(self, other: Permissions) -> Permissions {
        Permissions(self.0 | other.0)
    }

    /// Named rights set in this mask, for display
    pub fn names(self) -> Vec<&'static str> {
        [
            (Self::DEPLOY_POOL, "deployPool"),
            (Self::DEPLOY_FACTORY, "deployFactory"),
            (Self::UPDATE_VERIFICATION_KEY, "updateVerificationKey"),
            (Self::UPDATE_SIGNERS, "updateSigners"),
            (Self::APPROVE_UPGRADE, "approveUpgrade"),
            (Self::PAUSE, "pause"),
        ]
        .into_iter()
        .filter(|(bit, _)| self.contains(*bit))
        .map(|(_, name)| name)
        .collect()
    }
}

/// Class of network, used to key the one-time attestation setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    Mainnet,
    Testnet,
}

impl NetworkClass {
    /// Classify a network identifier such as `mina:mainnet` or `net-1`
    pub fn of(network: &str) -> Self {
        let name = network.rsplit(':').next().unwrap_or(network);
        if name.eq_ignore_ascii_case("mainnet") {
            NetworkClass::Mainnet
        } else {
            NetworkClass::Testnet
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NetworkClass::Mainnet => "mainnet",
            NetworkClass::Testnet => "testnet",
        }
    }
}

impl fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of custodial resource being deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pool,
    Factory,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Pool => "pool",
            ResourceKind::Factory => "factory",
        }
    }

    /// Right a signer must hold to authorize deploying this kind
    pub fn required_permission(self) -> Permissions {
        match self {
            ResourceKind::Pool => Permissions::DEPLOY_POOL,
            ResourceKind::Factory => Permissions::DEPLOY_FACTORY,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pool" => Ok(ResourceKind::Pool),
            "factory" => Ok(ResourceKind::Factory),
            other => Err(CoreError::Validation(format!("Unknown resource kind: {}", other))),
        }
    }
}

/// Kind-specific deployment parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceParams {
    /// A liquidity pool for a token pair
    #[serde(rename_all = "camelCase")]
    Pool { token_a: String, token_b: String },
    /// A pool factory
    Factory {},
}

impl ResourceParams {
    pub fn pool(token_a: impl Into<String>, token_b: impl Into<String>) -> Self {
        ResourceParams::Pool {
            token_a: token_a.into(),
            token_b: token_b.into(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceParams::Pool { .. } => ResourceKind::Pool,
            ResourceParams::Factory {} => ResourceKind::Factory,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let ResourceParams::Pool { token_a, token_b } = self {
            validate_identifier("tokenA", token_a)?;
            validate_identifier("tokenB", token_b)?;
            if token_a == token_b {
                return Err(CoreError::Validation(
                    "tokenA and tokenB must be different".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Deployment request submitted through the job API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// Caller-supplied job id; the key for idempotent creation
    pub job_id: String,
    /// Account requesting the deployment
    pub requester: String,
    /// Target network
    pub network: String,
    /// What to deploy
    pub params: ResourceParams,
}

impl DeployRequest {
    pub fn validate(&self) -> Result<()> {
        validate_identifier("jobId", &self.job_id)?;
        validate_identifier("requester", &self.requester)?;
        validate_identifier("network", &self.network)?;
        self.params.validate()
    }

    pub fn kind(&self) -> ResourceKind {
        self.params.kind()
    }
}

fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{} cannot be empty", field)));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(CoreError::Validation(format!(
            "{} too long (max {} chars)",
            field, MAX_IDENTIFIER_LEN
        )));
    }
    Ok(())
}

/// Lifecycle of a deployed resource row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Confirmed,
}

impl ResourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Confirmed => "confirmed",
        }
    }
}

/// Lifecycle of a job in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CoreError::Serialization(format!("Unknown job status: {}", other))),
        }
    }
}

/// Outcome of a createJob call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateStatus {
    /// A new job was enqueued
    Created,
    /// The job is already queued or running
    Exists,
    /// The job already finished; nothing was enqueued
    Completed,
}

/// Response to a createJob call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub id: String,
    pub status: CreateStatus,
}

/// What a completed job produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub resource_public_key: String,
    pub transaction_payload: String,
}

/// Point-in-time view of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

impl JobSnapshot {
    pub fn result(&self) -> Option<JobResult> {
        match (&self.resource_public_key, &self.transaction_payload) {
            (Some(key), Some(payload)) => Some(JobResult {
                resource_public_key: key.clone(),
                transaction_payload: payload.clone(),
            }),
            _ => None,
        }
    }
}

/// Event delivered on a job subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SubscriptionEvent {
    /// The job finished successfully
    Completed(JobSnapshot),
    /// The job failed; it may be re-enqueued with the same id
    Failed(JobSnapshot),
    /// No job with the requested id exists
    #[serde(rename_all = "camelCase")]
    NotFound { job_id: String },
}

impl SubscriptionEvent {
    pub fn from_snapshot(snapshot: JobSnapshot) -> Option<Self> {
        match snapshot.status {
            JobStatus::Completed => Some(SubscriptionEvent::Completed(snapshot)),
            JobStatus::Failed => Some(SubscriptionEvent::Failed(snapshot)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_permissions_contain_every_right() {
        let full = Permissions::FULL;
        assert!(full.contains(Permissions::DEPLOY_POOL));
        assert!(full.contains(Permissions::PAUSE));
        assert!(full.is_full());
        assert_eq!(full.names().len(), 6);

        let partial = Permissions::DEPLOY_POOL.union(Permissions::PAUSE);
        assert!(!partial.is_full());
        assert_eq!(partial.names(), vec!["deployPool", "pause"]);
    }

    #[test]
    fn test_network_class() {
        assert_eq!(NetworkClass::of("mina:mainnet"), NetworkClass::Mainnet);
        assert_eq!(NetworkClass::of("mainnet"), NetworkClass::Mainnet);
        assert_eq!(NetworkClass::of("mina:devnet"), NetworkClass::Testnet);
        assert_eq!(NetworkClass::of("net-1"), NetworkClass::Testnet);
    }

    #[test]
    fn test_deploy_request_validation() {
        let request = DeployRequest {
            job_id: "job-1".into(),
            requester: "U1".into(),
            network: "net-1".into(),
            params: ResourceParams::pool("MINA", "TOK"),
        };
        assert!(request.validate().is_ok());
        assert_eq!(request.kind(), ResourceKind::Pool);

        let same_tokens = DeployRequest {
            params: ResourceParams::pool("TOK", "TOK"),
            ..request.clone()
        };
        assert!(matches!(same_tokens.validate(), Err(CoreError::Validation(_))));

        let no_requester = DeployRequest {
            requester: "  ".into(),
            ..request
        };
        assert!(no_requester.validate().is_err());
    }

    #[test]
    fn test_params_wire_format() {
        let json = serde_json::to_value(ResourceParams::pool("MINA", "TOK")).unwrap();
        assert_eq!(json["kind"], "pool");
        assert_eq!(json["tokenA"], "MINA");

        let factory: ResourceParams = serde_json::from_str(r#"{"kind":"factory"}"#).unwrap();
        assert_eq!(factory.kind(), ResourceKind::Factory);
    }

    #[test]
    fn test_subscription_event_tagging() {
        let event = SubscriptionEvent::NotFound { job_id: "x".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "notFound");
        assert_eq!(json["jobId"], "x");
    }
}
