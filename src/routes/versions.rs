use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use std::io::Cursor;
use tokio_util::io::ReaderStream;

use super::envelope;
use crate::error::AppError;
use crate::models::version::{DiffQuery, NewVersion, RevertRequest};
use crate::state::AppState;

/// Body is the version content; `filename`, `comment` and `uploaded_by`
/// come from the query string.
pub async fn create_version(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(mut info): Query<NewVersion>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if info.mime_type.is_none() {
        info.mime_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|ct| !ct.starts_with("application/octet-stream"))
            .map(str::to_string);
    }
    let version = state
        .run_blocking(move |m| {
            m.versions()
                .create_version(&file_id, Cursor::new(body), info)
        })
        .await?;
    Ok((StatusCode::CREATED, envelope(version)))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let (chain, versions) = state
        .run_blocking(move |m| {
            let chain = m.versions().get_versioned_file(&file_id)?;
            let versions = m.versions().list_versions(&file_id)?;
            Ok((chain, versions))
        })
        .await?;
    Ok(Json(json!({
        "data": {
            "file_id": chain.file_id,
            "current_version": chain.current_version,
            "total_versions": chain.total_versions,
            "versions": versions,
        },
        "error": null
    })))
}

pub async fn get_version(
    State(state): State<AppState>,
    Path((file_id, version)): Path<(String, u32)>,
) -> Result<Json<Value>, AppError> {
    let meta = state
        .run_blocking(move |m| m.versions().get_version(&file_id, version))
        .await?;
    Ok(envelope(meta))
}

pub async fn download_version(
    State(state): State<AppState>,
    Path((file_id, version)): Path<(String, u32)>,
) -> Result<Response, AppError> {
    let (meta, file) = state
        .run_blocking(move |m| m.versions().get_version_file(&file_id, version))
        .await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &meta.mime_type)
        .header(header::CONTENT_LENGTH, meta.size.to_string())
        .header(header::ETAG, format!("\"{}\"", meta.hash))
        .body(Body::from_stream(ReaderStream::new(
            tokio::fs::File::from_std(file),
        )))
        .map_err(|e| AppError::Internal(e.to_string()))
}

pub async fn revert_version(
    State(state): State<AppState>,
    Path((file_id, version)): Path<(String, u32)>,
    Json(req): Json<RevertRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let reverted = state
        .run_blocking(move |m| {
            m.versions()
                .revert_version(&file_id, version, req.comment, &req.uploaded_by)
        })
        .await?;
    Ok((StatusCode::CREATED, envelope(reverted)))
}

pub async fn diff(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<Value>, AppError> {
    let diff = state
        .run_blocking(move |m| m.versions().get_version_diff(&file_id, query.from, query.to))
        .await?;
    Ok(envelope(diff))
}
