//! API module for the deployment server

pub mod auth;
pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub ready: bool,
    pub workers: usize,
    pub queue_depth: usize,
    pub held_keys: usize,
    pub setup_runs: usize,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadyResponse>) {
    let depth = state.service.queue_depth().await;
    if let Err(err) = &depth {
        warn!(error = %err, "Queue unavailable");
    }

    let ready = depth.is_ok() && state.workers > 0;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            ready,
            workers: state.workers,
            queue_depth: depth.unwrap_or(0),
            held_keys: state.service.registry().key_count(),
            setup_runs: state.setup.runs(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration for browser wallets
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Signer administration
    let admin = Router::new()
        .route("/v1/signers", post(handlers::register_signer))
        .route(
            "/v1/signers/{id}/grants/{network}",
            put(handlers::set_grant).delete(handlers::deactivate_grant),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin));

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Job endpoints
        .route("/v1/pools", post(handlers::create_pool))
        .route("/v1/factories", post(handlers::deploy_factory))
        .route("/v1/jobs/{id}", get(handlers::job_status))
        .route("/v1/jobs/{id}/events", get(handlers::job_events))
        .route("/v1/jobs/{id}/confirm", post(handlers::confirm_job))
        // Multisig
        .route("/v1/multisig", post(handlers::create_multisig_signature))
        .merge(admin)
        .route(
            "/v1/networks/{network}/authorization",
            get(handlers::network_authorization),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
