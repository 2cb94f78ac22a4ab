//! Core types for the deployment client

use poolforge_core::{DeployRequest, ResourceParams};
use serde::{Deserialize, Serialize};

/// What the user asked to deploy, before a job id is attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub requester: String,
    pub network: String,
    pub params: ResourceParams,
}

impl ResourceRequest {
    pub fn pool(
        requester: impl Into<String>,
        network: impl Into<String>,
        token_a: impl Into<String>,
        token_b: impl Into<String>,
    ) -> Self {
        Self {
            requester: requester.into(),
            network: network.into(),
            params: ResourceParams::pool(token_a, token_b),
        }
    }

    pub fn factory(requester: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            requester: requester.into(),
            network: network.into(),
            params: ResourceParams::Factory {},
        }
    }

    /// The job API request for this deployment under `job_id`
    pub fn with_job_id(&self, job_id: impl Into<String>) -> DeployRequest {
        DeployRequest {
            job_id: job_id.into(),
            requester: self.requester.clone(),
            network: self.network.clone(),
            params: self.params.clone(),
        }
    }
}

/// Inclusion state of a submitted transaction as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InclusionStatus {
    Pending,
    Included,
    Rejected { reason: String },
}
