//! Logging API routes.
//!
//! View and change the active log filter at runtime.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

/// Request to update the log filter.
#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

/// Response for logging configuration.
#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_logging_config).put(update_logging_config))
}

/// `GET /api/logging`
async fn get_logging_config(
    State(state): State<AppState>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))?;

    Ok(Json(LoggingConfigResponse {
        filter: logging_config.get_filter(),
    }))
}

/// `PUT /api/logging` with `{"filter": "filter_service=debug"}`.
async fn update_logging_config(
    State(state): State<AppState>,
    request: Result<Json<UpdateLogFilterRequest>, JsonRejection>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))?;

    let Json(request) = request?;
    logging_config.set_filter(&request.filter)?;

    Ok(Json(LoggingConfigResponse {
        filter: logging_config.get_filter(),
    }))
}
