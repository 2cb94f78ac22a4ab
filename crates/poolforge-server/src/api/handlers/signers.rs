//! Signer Administration Handlers
//!
//! Registers operators and manages their per-network grants. Every grant
//! change invalidates the network's cached authorization tree.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::handlers::jobs::AppState;
use crate::storage::{GrantRecord, SignerRecord};

/// Request to register a signer
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSignerRequest {
    /// Base64-encoded Ed25519 public key (32 bytes)
    pub public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerResponse {
    pub id: i64,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

impl From<SignerRecord> for SignerResponse {
    fn from(record: SignerRecord) -> Self {
        Self {
            id: record.id,
            public_key: record.public_key.to_base64(),
            created_at: record.created_at,
        }
    }
}

/// Request to set a signer's permissions on a network
#[derive(Debug, Deserialize)]
pub struct SetGrantRequest {
    /// Permission bitmask
    pub permissions: u16,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantResponse {
    pub signer_id: i64,
    pub network: String,
    pub permissions: u16,
    pub rights: Vec<String>,
    pub active: bool,
}

impl From<GrantRecord> for GrantResponse {
    fn from(grant: GrantRecord) -> Self {
        Self {
            signer_id: grant.signer_id,
            network: grant.network,
            permissions: grant.permissions.bits(),
            rights: grant.permissions.names().into_iter().map(String::from).collect(),
            active: grant.active,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedSignerEntry {
    pub id: i64,
    pub public_key: String,
    pub permissions: u16,
}

/// Authorization state of a network
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAuthorizationResponse {
    pub network: String,
    pub root: String,
    pub signers: Vec<AuthorizedSignerEntry>,
    /// Ids of signers eligible for custody and authorization
    pub full_rights_signers: Vec<i64>,
}

/// Register a signer
///
/// POST /v1/signers
pub async fn register_signer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterSignerRequest>,
) -> Result<(StatusCode, Json<SignerResponse>), ApiError> {
    let record = state.service.register_signer(&request.public_key).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// Insert or replace a grant
///
/// PUT /v1/signers/{id}/grants/{network}
pub async fn set_grant(
    State(state): State<Arc<AppState>>,
    Path((signer_id, network)): Path<(i64, String)>,
    Json(request): Json<SetGrantRequest>,
) -> Result<Json<GrantResponse>, ApiError> {
    let grant = state
        .service
        .set_grant(signer_id, &network, request.permissions)
        .await?;
    Ok(Json(grant.into()))
}

/// Deactivate a grant
///
/// DELETE /v1/signers/{id}/grants/{network}
pub async fn deactivate_grant(
    State(state): State<Arc<AppState>>,
    Path((signer_id, network)): Path<(i64, String)>,
) -> Result<StatusCode, ApiError> {
    state.service.deactivate_grant(signer_id, &network).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Root and members of a network's authorization tree
///
/// GET /v1/networks/{network}/authorization
pub async fn network_authorization(
    State(state): State<Arc<AppState>>,
    Path(network): Path<String>,
) -> Result<Json<NetworkAuthorizationResponse>, ApiError> {
    let auth = state.service.network_authorization(&network).await?;

    Ok(Json(NetworkAuthorizationResponse {
        network: auth.network.clone(),
        root: auth.tree.root_base64(),
        signers: auth
            .signers
            .iter()
            .map(|s| AuthorizedSignerEntry {
                id: s.signer.id,
                public_key: s.signer.public_key.to_base64(),
                permissions: s.permissions.bits(),
            })
            .collect(),
        full_rights_signers: auth.custodians().iter().map(|c| c.signer_id).collect(),
    }))
}
