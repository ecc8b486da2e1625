use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{FilePayload, UploadResponse};
use crate::state::AppState;

/// Job type ingestion workers handle.
pub const JOB_NAME: &str = "file-upload";

/// POST /api/upload - Store the `file` field and queue it for ingestion
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::Validation(format!("Failed to read upload: {e}")))?;
        if bytes.is_empty() {
            return Err(Error::Validation("Uploaded file is empty".into()));
        }

        // ── Store under a fresh name ──────────────────────────
        let stored_name = match extension(&original_name) {
            Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        };
        let file_path = state.config.uploads_dir().join(&stored_name);
        tokio::fs::create_dir_all(state.config.uploads_dir()).await?;
        tokio::fs::write(&file_path, &bytes).await?;

        // ── Enqueue ───────────────────────────────────────────
        let now = Utc::now();
        let file_url = format!("/uploads/{stored_name}");
        let payload = FilePayload {
            document_id: Uuid::new_v4(),
            file_name: stored_name.clone(),
            file_url: file_url.clone(),
            file_type: content_type.unwrap_or_else(|| content_type_for(&stored_name).to_string()),
            file_size: bytes.len() as u64,
            file_path: file_path.display().to_string(),
            file_created_at: now,
            file_updated_at: now,
        };
        let document_id = payload.document_id;
        let job = match state.queue.add(JOB_NAME, payload) {
            Ok(job) => job,
            Err(e) => {
                // Nothing will ingest it, so keep no orphan on disk
                if let Err(rm) = tokio::fs::remove_file(&file_path).await {
                    tracing::warn!("Failed to remove {}: {rm}", file_path.display());
                }
                return Err(e);
            }
        };
        tracing::info!(
            "Stored {original_name} as {stored_name} ({} bytes), job {}",
            bytes.len(),
            job.id
        );

        return Ok(Json(UploadResponse {
            message: "File uploaded and job queued".to_string(),
            file_url,
            queue: state.queue.name().to_string(),
            job_id: job.id,
            document_id,
        }));
    }

    Err(Error::Validation("No file uploaded".into()))
}

/// GET /uploads/{name} - Serve a stored upload
pub async fn serve_upload(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    // Only bare file names; no traversal out of the uploads directory
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(Error::NotFound("File not found".into()));
    }
    let path = state.config.uploads_dir().join(&name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| Error::NotFound("File not found".into()))?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&name))], bytes))
}

/// Lowercased extension, kept only when it is short and alphanumeric.
fn extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_lowercase();
    let valid = !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}

fn content_type_for(file_name: &str) -> &'static str {
    match extension(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") | Some("markdown") => "text/markdown",
        _ => "application/octet-stream",
    }
}
