use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::index::CollectionInfo;
use crate::queue::{Job, QueueCounts};
use crate::state::AppState;

/// GET /api/jobs/{id} - Current state of one ingestion job
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>> {
    state
        .queue
        .get_job_status(id)
        .map(Json)
        .ok_or_else(|| Error::NotFound("Job not found".into()))
}

/// GET /api/jobs - All jobs, newest first
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.queue.list())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub collection: CollectionInfo,
    pub queue: String,
    pub jobs: QueueCounts,
}

/// GET /api/health - Collection and queue summary
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let collection = state.index.describe().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        collection,
        queue: state.queue.name().to_string(),
        jobs: state.queue.counts(),
    }))
}
