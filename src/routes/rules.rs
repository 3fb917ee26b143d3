use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use super::envelope;
use crate::error::AppError;
use crate::models::rule::CreateRuleRequest;
use crate::state::AppState;

pub async fn list_rules(State(state): State<AppState>) -> Json<Value> {
    envelope(state.manager.routing_rules().list())
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let rule = state
        .run_blocking(move |m| m.routing_rules().add_rule(req))
        .await?;
    tracing::info!(rule_id = %rule.id, destination = %rule.destination_path(), "Routing rule created");
    Ok((StatusCode::CREATED, envelope(rule)))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let rule = state
        .run_blocking(move |m| m.routing_rules().remove_rule(&id))
        .await?;
    tracing::info!(rule_id = %rule.id, "Routing rule removed");
    Ok(envelope(rule))
}
