use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Failures raised by the storage engine and the ingestion pool.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File already deleted: {0}")]
    AlreadyDeleted(String),

    #[error("File is not deleted: {0}")]
    NotDeleted(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    #[error("Name conflict: {0}")]
    NameConflict(String),

    #[error("Version limit of {limit} reached for {file_id}")]
    VersionLimitReached { file_id: String, limit: usize },

    #[error("Version {version} not found for {file_id}")]
    VersionNotFound { file_id: String, version: u32 },

    #[error("Job queue is full")]
    QueueFull,

    #[error("Worker pool is shut down")]
    PoolShutdown,

    #[error("Worker pool already started")]
    PoolAlreadyStarted,

    #[error("Job cancelled before it started")]
    Cancelled,

    #[error("Batch did not finish within {0} seconds")]
    BatchTimeout(u64),

    #[error("Ingest of item {index} ({filename}) failed: {source}")]
    IngestFailed {
        index: usize,
        filename: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Invalid merge request: {0}")]
    InvalidMergeRequest(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid storage override: {0}")]
    InvalidOverride(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid routing rule: {0}")]
    InvalidRule(String),

    #[error("Storage I/O error: {0}")]
    StorageIO(#[from] std::io::Error),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl StorageError {
    /// True for errors caused by caller input rather than the engine.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidFilename(_)
                | StorageError::InvalidCategory(_)
                | StorageError::InvalidMergeRequest(_)
                | StorageError::InvalidMetadata(_)
                | StorageError::InvalidOverride(_)
                | StorageError::InvalidQuery(_)
                | StorageError::InvalidRule(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Internal(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Storage(e) => match e {
                StorageError::NotFound(_) | StorageError::VersionNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                StorageError::AlreadyDeleted(_)
                | StorageError::NotDeleted(_)
                | StorageError::NameConflict(_)
                | StorageError::VersionLimitReached { .. } => StatusCode::CONFLICT,
                StorageError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
                StorageError::PoolShutdown => StatusCode::SERVICE_UNAVAILABLE,
                StorageError::BatchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                StorageError::IngestFailed { source, .. } if source.is_validation() => {
                    StatusCode::BAD_REQUEST
                }
                e if e.is_validation() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        tracing::error!(status = %status, error = %message);

        let body = json!({
            "data": null,
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
