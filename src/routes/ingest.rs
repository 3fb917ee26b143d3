use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::models::file::IngestRequest;
use crate::models::value::flatten_metadata;
use crate::sandbox::path_validator::resolve_inbox_file;
use crate::state::AppState;
use crate::workers::{ingest_batch, IngestJob, IngestOptions};

const MAX_BATCH_WORKERS: usize = 256;

/// Store a batch of files that already sit in the inbox directory.
pub async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<Value>, AppError> {
    if req.files.is_empty() {
        return Err(AppError::BadRequest("files must not be empty".into()));
    }

    let inbox = state.config.inbox_dir();
    let mut jobs = Vec::with_capacity(req.files.len());
    for (index, item) in req.files.into_iter().enumerate() {
        let path = resolve_inbox_file(&inbox, &item.path)?;
        let filename = match item.filename {
            Some(name) => name,
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| AppError::BadRequest(format!("{} has no file name", item.path)))?,
        };
        jobs.push(IngestJob {
            index,
            path,
            filename,
            content_type: item.content_type,
            metadata: flatten_metadata(item.metadata)?,
            category_hint: item.category_hint,
            storage_override: item.storage_override,
        });
    }

    let mut options = IngestOptions::from_config(&state.config);
    if let Some(workers) = req.workers {
        options.workers = workers.clamp(1, MAX_BATCH_WORKERS);
    }

    let total = jobs.len();
    tracing::info!(files = total, workers = options.workers, "Ingest batch started");
    let manager = state.manager.clone();
    let outcomes = tokio::task::spawn_blocking(move || ingest_batch(manager, jobs, &options))
        .await
        .map_err(|e| AppError::Internal(format!("ingest task failed: {}", e)))??;

    let duplicates = outcomes.iter().filter(|o| o.duplicate).count();
    Ok(Json(json!({
        "data": {
            "files": outcomes,
            "total": total,
            "stored": total - duplicates,
            "duplicates": duplicates,
        },
        "error": null
    })))
}
