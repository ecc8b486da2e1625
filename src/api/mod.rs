//! HTTP boundary.

pub mod chat;
pub mod jobs;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// All routes, with the upload size limit applied.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_mb * 1024 * 1024;
    Router::new()
        .route("/api/upload", post(upload::upload))
        .route("/api/chat", post(chat::chat))
        .route("/api/jobs", get(jobs::list_jobs))
        .route("/api/jobs/{id}", get(jobs::get_job))
        .route("/api/health", get(jobs::health))
        .route("/uploads/{name}", get(upload::serve_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
