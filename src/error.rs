use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the ingestion pipeline, the job queue and the answer service.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad caller input. Never retried.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Invalid settings, e.g. chunk overlap not smaller than chunk size.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Collection dimension/metric disagrees with what this service expects.
    #[error("Index configuration error: {0}")]
    IndexConfiguration(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn load(path: impl Into<String>, reason: impl ToString) -> Self {
        Error::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a job attempt that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Validation(_) | Error::NotFound(_) | Error::Configuration(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Generation(_) | Error::Retrieval(_) | Error::Embedding(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Rendered as `{"error": "..."}` with the mapped status code.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
