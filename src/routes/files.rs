use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Cursor;
use tokio_util::io::ReaderStream;

use super::envelope;
use crate::error::{AppError, StorageError};
use crate::models::file::{
    BatchCopyRequest, BatchDeleteRequest, BatchMoveRequest, CopyFileRequest, CopyRequest,
    MoveFileRequest, RenameFileRequest, StoreRequest, UpdateMetadataRequest,
};
use crate::models::query::{FileQuery, NameLookupQuery};
use crate::models::value::flatten_metadata;
use crate::state::AppState;

const META_HEADER_PREFIX: &str = "x-meta-";

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `X-Meta-<key>: <value>` headers become user metadata.
fn metadata_from_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_HEADER_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

pub async fn upload_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let req = StoreRequest {
        filename: name,
        // A generic content type says nothing; let the engine sniff instead.
        mime_type: header_str(&headers, header::CONTENT_TYPE.as_str())
            .filter(|ct| !ct.starts_with("application/octet-stream")),
        declared_size: header_str(&headers, header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok()),
        metadata: metadata_from_headers(&headers),
        category_hint: header_str(&headers, "x-category-hint"),
        storage_override: header_str(&headers, "x-storage-override"),
    };

    let outcome = state
        .run_blocking(move |m| m.store_file(Cursor::new(body), req))
        .await?;

    let status = if outcome.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, envelope(outcome)))
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let meta = state.run_blocking(move |m| m.get_file(&id)).await?;
    Ok(envelope(meta))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (meta, file) = state.run_blocking(move |m| m.open_file(&id)).await?;
    if meta.is_deleted() {
        return Err(StorageError::NotFound(format!("File {} is deleted", meta.id)).into());
    }

    let etag = format!("\"{}\"", meta.hash);
    if let Some(inm) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if inm == etag || inm == meta.hash {
            return Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(header::ETAG, &etag)
                .body(Body::empty())
                .map_err(|e| AppError::Internal(e.to_string()));
        }
    }

    let stream = ReaderStream::new(tokio::fs::File::from_std(file));
    let disposition = format!(
        "inline; filename=\"{}\"",
        meta.original_name.replace(['"', '\\'], "_")
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &meta.mime_type)
        .header(header::CONTENT_LENGTH, meta.size.to_string())
        .header(header::ETAG, &etag)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(
            header::LAST_MODIFIED,
            meta.uploaded_at
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Value>, AppError> {
    run_query(state, query).await
}

pub async fn search_files(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Value>, AppError> {
    if !query.has_criteria() {
        return Err(StorageError::InvalidQuery(
            "search needs at least one filter (name, extension, category, mime_type, size or date)"
                .into(),
        )
        .into());
    }
    run_query(state, query).await
}

async fn run_query(state: AppState, query: FileQuery) -> Result<Json<Value>, AppError> {
    let (files, total, query) = state
        .run_blocking(move |m| {
            let files = m.query_files(&query)?;
            let total = m.count_files(&query)?;
            Ok((files, total, query))
        })
        .await?;

    Ok(Json(json!({
        "data": {
            "files": files,
            "total": total,
            "page": query.page,
            "limit": query.limit,
            "offset": query.offset,
        },
        "error": null
    })))
}

pub async fn find_by_name(
    State(state): State<AppState>,
    Query(query): Query<NameLookupQuery>,
) -> Result<Json<Value>, AppError> {
    let files = state
        .run_blocking(move |m| Ok(m.find_by_original_name(&query.name)))
        .await?;
    Ok(envelope(files))
}

pub async fn duplicates(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let groups = state.run_blocking(|m| Ok(m.find_duplicates())).await?;
    let total_wasted: u64 = groups.iter().map(|g| g.total_wasted).sum();
    Ok(Json(json!({
        "data": {
            "groups": groups,
            "total_wasted": total_wasted,
        },
        "error": null
    })))
}

pub async fn categories(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let categories = state.run_blocking(|m| Ok(m.get_categories())).await?;
    Ok(envelope(categories))
}

pub async fn soft_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let result = state.run_blocking(move |m| m.soft_delete_file(&id)).await?;
    Ok(envelope(result))
}

pub async fn restore(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let meta = state.run_blocking(move |m| m.restore_file(&id)).await?;
    Ok(envelope(meta))
}

pub async fn hard_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let result = state.run_blocking(move |m| m.hard_delete_file(&id)).await?;
    Ok(envelope(result))
}

pub async fn batch_delete(
    State(state): State<AppState>,
    Json(req): Json<BatchDeleteRequest>,
) -> Result<Json<Value>, AppError> {
    if req.ids.is_empty() {
        return Err(AppError::BadRequest("ids must not be empty".into()));
    }
    let result = state
        .run_blocking(move |m| Ok(m.batch_delete(&req.ids, req.soft)))
        .await?;
    Ok(envelope(result))
}

pub async fn rename(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RenameFileRequest>,
) -> Result<Json<Value>, AppError> {
    let meta = state
        .run_blocking(move |m| m.rename_file(&id, &req.new_name, req.update_stored_file))
        .await?;
    Ok(envelope(meta))
}

pub async fn move_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MoveFileRequest>,
) -> Result<Json<Value>, AppError> {
    let meta = state
        .run_blocking(move |m| m.move_file(&id, &req.new_category))
        .await?;
    Ok(envelope(meta))
}

pub async fn batch_move(
    State(state): State<AppState>,
    Json(req): Json<BatchMoveRequest>,
) -> Result<Json<Value>, AppError> {
    if req.moves.is_empty() {
        return Err(AppError::BadRequest("moves must not be empty".into()));
    }
    let moved = state.run_blocking(move |m| m.batch_move(&req.moves)).await?;
    Ok(Json(json!({
        "data": {
            "total_moved": moved.len(),
            "files": moved,
        },
        "error": null
    })))
}

pub async fn copy_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CopyFileRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let metadata = req.metadata.map(flatten_metadata).transpose()?;
    let copy = CopyRequest {
        id,
        new_name: req.new_name,
        new_category: req.new_category,
        metadata,
        hard_link: req.hard_link,
    };
    let meta = state
        .run_blocking(move |m| {
            let id = copy.id.clone();
            m.copy_file(&id, copy)
        })
        .await?;
    Ok((StatusCode::CREATED, envelope(meta)))
}

pub async fn batch_copy(
    State(state): State<AppState>,
    Json(req): Json<BatchCopyRequest>,
) -> Result<Json<Value>, AppError> {
    if req.copies.is_empty() {
        return Err(AppError::BadRequest("copies must not be empty".into()));
    }
    let result = state
        .run_blocking(move |m| Ok(m.batch_copy(req.copies)))
        .await?;
    Ok(envelope(result))
}

pub async fn update_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateMetadataRequest>,
) -> Result<Json<Value>, AppError> {
    let patch = flatten_metadata(req.metadata)?;
    let meta = state
        .run_blocking(move |m| m.update_metadata(&id, patch, req.merge))
        .await?;
    Ok(envelope(meta))
}
