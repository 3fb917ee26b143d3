use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

pub async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let stats = state.run_blocking(|m| Ok(m.get_stats())).await?;
    let version_chains = state.manager.versions().chain_count();
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds();

    Ok(Json(json!({
        "data": {
            "stats": stats,
            "version_chains": version_chains,
            "routing_rules": state.manager.routing_rules().list().len(),
            "uptime_seconds": uptime,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "error": null
    })))
}
