//! Thin collaborator surface consumed by the external HTTP facade.
//! No control logic lives here; each handler delegates to the lifecycle
//! manager and reports typed failures instead of raising.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::commands::BacktestRequest;
use crate::lifecycle::{LifecycleManager, WorkerSummary};
use crate::router::RouterHandle;

/// Shared state injected into every handler.
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub transport: RouterHandle,
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/workers", get(list_workers))
        .route("/workers/{id}/backtest", post(run_backtest))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub transport_connected: bool,
    pub runtime_available: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let transport_connected = state.transport.transport_connected();
    let runtime_available = state.lifecycle.runtime_available().await;

    let status = if transport_connected && runtime_available {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        transport_connected,
        runtime_available,
    })
}

#[derive(Serialize)]
pub struct WorkersResponse {
    pub workers: Vec<WorkerSummary>,
}

async fn list_workers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<WorkersResponse>, StatusCode> {
    match state.lifecycle.list().await {
        Ok(workers) => Ok(Json(WorkersResponse { workers })),
        Err(e) => {
            error!("Failed to list workers: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

#[derive(Serialize)]
pub struct BacktestResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn run_backtest(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
    Json(request): Json<BacktestRequest>,
) -> Json<BacktestResponse> {
    match state
        .lifecycle
        .run_backtest(
            &worker_id,
            &request.spec,
            &request.start_date,
            &request.end_date,
        )
        .await
    {
        Ok(container_id) => Json(BacktestResponse {
            success: true,
            container_id: Some(container_id),
            error: None,
        }),
        Err(e) => {
            error!("Backtest for worker {} failed: {}", worker_id, e);
            Json(BacktestResponse {
                success: false,
                container_id: None,
                error: Some(e.to_string()),
            })
        }
    }
}
