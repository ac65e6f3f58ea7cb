use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod error;
pub mod health;
pub mod metrics;
pub mod status;
pub mod upload;

/// API routes that share [`AppState`].
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/upload", post(upload::upload_manifest))
        .route("/status/{request_id}", get(status::get_job_status))
        .with_state(state)
}
