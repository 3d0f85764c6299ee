//! HTTP API surface.

pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::engine::Engine;

pub use types::{ApiError, BehavioralValidateRequest, ValidateConfig};

/// Build the API router for a wired engine.
pub fn router(engine: Arc<Engine>) -> Router {
    let body_limit = engine.config.max_total_size + 1024 * 1024;

    Router::new()
        .route("/api/validate", post(handlers::submit_validation))
        .route("/api/validate/hybrid", post(handlers::submit_hybrid))
        .route("/api/validate/:request_id/status", get(handlers::session_status))
        .route("/api/validate/:request_id/result", get(handlers::session_result))
        .route("/api/validate/:request_id/report", get(handlers::session_report))
        .route("/api/validate/:request_id", delete(handlers::cancel_or_delete))
        .route("/api/behavioral/validate", post(handlers::submit_behavioral))
        .route("/api/technologies", get(handlers::technologies))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(engine)
}
