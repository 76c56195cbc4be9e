//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::models::{ComponentHealth, HealthResponse};
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();
    let manager = &state.pipeline_manager;

    let workers = if manager.is_running() {
        ComponentHealth {
            name: "worker_pool".to_string(),
            status: "healthy".to_string(),
            message: None,
        }
    } else {
        ComponentHealth {
            name: "worker_pool".to_string(),
            status: "unhealthy".to_string(),
            message: Some("workers are not running".to_string()),
        }
    };

    let root = manager.scratch().root();
    let scratch = if tokio::fs::try_exists(root).await.unwrap_or(false) {
        ComponentHealth {
            name: "scratch".to_string(),
            status: "healthy".to_string(),
            message: None,
        }
    } else {
        ComponentHealth {
            name: "scratch".to_string(),
            status: "unhealthy".to_string(),
            message: Some(format!("{} is missing", root.display())),
        }
    };

    let components = vec![workers, scratch];
    let status = if components.iter().all(|c| c.status == "healthy") {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
        components,
    })
}

/// Readiness check - is the service ready to accept jobs?
/// Returns HTTP 200 while workers run, HTTP 503 otherwise.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.pipeline_manager.is_running() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Liveness check - is the service alive?
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}
