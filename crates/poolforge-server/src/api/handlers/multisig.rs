//! Multisig Handler
//!
//! Signs upgrade approvals with operator keys held by the server.

use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

use crate::api::error::ApiError;
use crate::api::handlers::jobs::AppState;
use crate::service::{MultisigRequest, MultisigResponse};

/// Create a multisig approval signature
///
/// POST /v1/multisig
pub async fn create_multisig_signature(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MultisigRequest>,
) -> Result<Json<MultisigResponse>, ApiError> {
    let network = request.network.clone();
    let response = state.service.create_multisig_signature(request).await?;
    info!(network = %network, rights = ?response.rights, "createMultisigSignature");
    Ok(Json(response))
}
