//! API route modules.
//!
//! Organizes routes by resource type.

pub mod filter;
pub mod health;
pub mod logging;

use axum::Router;

use crate::api::models::FILTER_API_BASE;
use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest(FILTER_API_BASE, filter::router(state.max_upload_bytes))
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .with_state(state)
}
