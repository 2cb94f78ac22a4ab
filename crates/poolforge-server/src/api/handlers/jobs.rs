//! Job Handlers
//!
//! Create, inspect, follow and confirm deployment jobs.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use poolforge_core::{
    CreateJobResponse, DeployRequest, JobSnapshot, ResourceParams, SubscriptionEvent,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::error::ApiError;
use crate::core::SetupCache;
use crate::service::JobService;

/// Shared state for all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<JobService>,
    pub setup: Arc<SetupCache>,
    /// Number of worker slots started alongside the API
    pub workers: usize,
    /// Bearer token for signer administration; admin routes refuse all
    /// requests when unset
    pub admin_token: Option<String>,
}

/// Request to deploy a pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePoolRequest {
    /// Caller-chosen job id; generated when absent
    #[serde(default)]
    pub job_id: Option<String>,
    pub requester: String,
    pub network: String,
    pub token_a: String,
    pub token_b: String,
}

/// Request to deploy a factory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployFactoryRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    pub requester: String,
    pub network: String,
}

/// Response from a job confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmResponse {
    pub message: String,
}

fn job_id_or_new(job_id: Option<String>) -> String {
    job_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Enqueue a pool deployment
///
/// POST /v1/pools
pub async fn create_pool(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePoolRequest>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    let request = DeployRequest {
        job_id: job_id_or_new(request.job_id),
        requester: request.requester,
        network: request.network,
        params: ResourceParams::pool(request.token_a, request.token_b),
    };

    let response = state.service.create_job(request).await?;
    info!(job_id = %response.id, status = ?response.status, "createPool");
    Ok(Json(response))
}

/// Enqueue a factory deployment
///
/// POST /v1/factories
pub async fn deploy_factory(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeployFactoryRequest>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    let request = DeployRequest {
        job_id: job_id_or_new(request.job_id),
        requester: request.requester,
        network: request.network,
        params: ResourceParams::Factory {},
    };

    let response = state.service.create_job(request).await?;
    info!(job_id = %response.id, status = ?response.status, "deployFactory");
    Ok(Json(response))
}

/// Current job snapshot
///
/// GET /v1/jobs/{id}
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    Ok(Json(state.service.status_job(&id).await?))
}

/// Terminal job events as Server-Sent Events
///
/// GET /v1/jobs/{id}/events
///
/// Each event is named after its `type` and carries the JSON event as data.
/// The stream ends after the first terminal event.
pub async fn job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let events = state.service.subscribe_job(&id).await?;
    debug!(job_id = %id, "Opened job event stream");

    let stream = events.map(|event| {
        let name = match &event {
            SubscriptionEvent::Completed(_) => "completed",
            SubscriptionEvent::Failed(_) => "failed",
            SubscriptionEvent::NotFound { .. } => "notFound",
        };
        Event::default().event(name).json_data(&event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// Confirm a completed job
///
/// POST /v1/jobs/{id}/confirm
pub async fn confirm_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let message = state.service.confirm_job(&id).await?;
    Ok(Json(ConfirmResponse { message }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_pool_request_is_camel_case() {
        let request: CreatePoolRequest = serde_json::from_value(serde_json::json!({
            "requester": "U1",
            "network": "net-1",
            "tokenA": "MINA",
            "tokenB": "TOK"
        }))
        .unwrap();
        assert!(request.job_id.is_none());
        assert_eq!(request.token_a, "MINA");
    }

    #[test]
    fn test_blank_job_id_is_replaced() {
        assert_eq!(job_id_or_new(Some("job-1".into())), "job-1");
        assert!(!job_id_or_new(Some("  ".into())).trim().is_empty());
        assert_ne!(job_id_or_new(None), job_id_or_new(None));
    }
}
