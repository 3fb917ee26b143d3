pub mod files;
pub mod health;
pub mod ingest;
pub mod rules;
pub mod versions;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Success envelope shared by every JSON handler.
pub(crate) fn envelope<T: Serialize>(data: T) -> axum::Json<Value> {
    axum::Json(json!({ "data": data, "error": null }))
}

fn cors_layer(origins: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);
    if origins.trim() == "*" {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .split(',')
        .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
        .collect();
    layer.allow_origin(allowed)
}

pub fn build_router(state: AppState) -> Router {
    let max_upload = state.config.max_upload_size as usize;

    let public_routes = Router::new().route("/health", get(health::health));

    let api_routes = Router::new()
        .route("/status", get(health::status))
        // Files
        .route("/upload/{*name}", post(files::upload_file))
        .route("/files", get(files::list_files))
        .route("/files/search", get(files::search_files))
        .route("/files/by-name", get(files::find_by_name))
        .route("/files/duplicates", get(files::duplicates))
        .route("/files/batch-delete", post(files::batch_delete))
        .route("/files/batch-move", post(files::batch_move))
        .route("/files/batch-copy", post(files::batch_copy))
        .route("/files/{id}", get(files::get_file))
        .route("/files/{id}", delete(files::hard_delete))
        .route("/files/{id}/content", get(files::download_file))
        .route("/files/{id}/metadata", patch(files::update_metadata))
        .route("/files/{id}/soft-delete", post(files::soft_delete))
        .route("/files/{id}/restore", post(files::restore))
        .route("/files/{id}/rename", post(files::rename))
        .route("/files/{id}/move", post(files::move_file))
        .route("/files/{id}/copy", post(files::copy_file))
        .route("/categories", get(files::categories))
        // Versions
        .route("/versions/{file_id}", post(versions::create_version))
        .route("/versions/{file_id}", get(versions::list_versions))
        .route("/versions/{file_id}/diff", get(versions::diff))
        .route("/versions/{file_id}/{version}", get(versions::get_version))
        .route(
            "/versions/{file_id}/{version}/content",
            get(versions::download_version),
        )
        .route(
            "/versions/{file_id}/{version}/revert",
            post(versions::revert_version),
        )
        // Routing rules
        .route("/routing-rules", get(rules::list_rules))
        .route("/routing-rules", post(rules::create_rule))
        .route("/routing-rules/{id}", delete(rules::delete_rule))
        // Batch ingest from the inbox
        .route("/ingest", post(ingest::ingest));

    let x_request_id = http::HeaderName::from_static("x-request-id");

    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config.cors_allowed_origins))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
