//! REST API server for the report orchestrator
//!
//! Thin HTTP surface over `Orchestrator::submit`.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::models::{Outcome, Request, RequestHints};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubmitRequest {
    pub request: String,
    #[serde(default)]
    pub hints: RequestHints,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Capability Listing
/// =============================

async fn list_capabilities(State(state): State<ApiState>) -> Json<ApiResponse> {
    Json(ApiResponse::success(state.orchestrator.capabilities()))
}

/// =============================
/// Submit Endpoint
/// =============================

async fn submit(
    State(state): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.request.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("request text must not be empty".into())),
        );
    }

    let request = Request::new(req.request).with_hints(req.hints);
    info!(request_id = %request.request_id, "Received submit request");

    match state.orchestrator.submit(request).await {
        Ok(outcome) => {
            if let Outcome::ClarificationNeeded { request_id, .. } = &outcome {
                info!(%request_id, "Responding with clarification question");
            }
            (StatusCode::OK, Json(ApiResponse::success(outcome)))
        }
        Err(e) => {
            let status = if e.is_run_terminating() {
                StatusCode::UNPROCESSABLE_ENTITY
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            warn!(error = %e, %status, "Submit failed");
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/capabilities", get(list_capabilities))
        .route("/api/submit", post(submit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
