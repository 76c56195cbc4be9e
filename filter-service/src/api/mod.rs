//! REST API server module.
//!
//! Provides HTTP endpoints for submitting filter jobs, polling their status
//! and downloading results.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState, build_router};
